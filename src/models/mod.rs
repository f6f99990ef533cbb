pub mod decision;
pub mod goods_receipt;
pub mod invoice;
pub mod purchase_order;
pub mod result;
pub mod snapshot;
pub mod vendor;

pub use decision::{Decision, Eligibility, InvoiceDecision, ReviewReason};
pub use goods_receipt::GoodsReceiptRecord;
pub use invoice::{InvoiceHeader, InvoiceLine, PostedInvoice};
pub use purchase_order::{PurchaseOrder, PurchaseOrderHeader, PurchaseOrderLine};
pub use result::{MatchResult, MatchStatus, PoLineRef, VarianceType};
pub use snapshot::InvoiceSnapshot;
pub use vendor::VendorProfile;
