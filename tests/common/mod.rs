#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use invoice_autopilot::engine::AutopilotThreshold;
use invoice_autopilot::models::{
    InvoiceHeader, InvoiceLine, InvoiceSnapshot, PurchaseOrder, PurchaseOrderLine, VendorProfile,
};

pub const INVOICE_ID: &str = "INV-2024-0042";
pub const PO_NUMBER: &str = "4500012345";

pub fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn threshold(value: i64) -> AutopilotThreshold {
    AutopilotThreshold::new(value).unwrap()
}

/// 金额按 quantity * unit_price 计算
pub fn inv_line(line_num: i32, description: &str, qty: &str, price: &str) -> InvoiceLine {
    let quantity = dec(qty);
    let unit_price = dec(price);
    InvoiceLine {
        invoice_id: INVOICE_ID.to_string(),
        line_num,
        description: description.to_string(),
        amount: (&quantity * &unit_price).round(2),
        quantity,
        unit_of_measure: "EA".to_string(),
        unit_price,
        po_line_ref: None,
        gr_document_ref: None,
        material_code: None,
    }
}

pub fn po_line(line_num: i32, description: &str, qty: &str, price: &str) -> PurchaseOrderLine {
    PurchaseOrderLine {
        po_number: PO_NUMBER.to_string(),
        line_num,
        description: description.to_string(),
        quantity: dec(qty),
        unit_price: dec(price),
        material_code: None,
        cost_center: Some("CC-100".to_string()),
    }
}

pub fn header(po_number: Option<&str>) -> InvoiceHeader {
    InvoiceHeader {
        invoice_id: INVOICE_ID.to_string(),
        vendor_id: "V-ACME".to_string(),
        vendor_reference: "ACME-7781".to_string(),
        invoice_date: date(2024, 3, 15),
        po_number: po_number.map(str::to_string),
        currency: "USD".to_string(),
    }
}

pub fn po_snapshot(lines: Vec<InvoiceLine>, po_lines: Vec<PurchaseOrderLine>) -> InvoiceSnapshot {
    InvoiceSnapshot {
        header: header(Some(PO_NUMBER)),
        lines,
        purchase_order: Some(PurchaseOrder {
            po_number: PO_NUMBER.to_string(),
            vendor_id: "V-ACME".to_string(),
            created_date: date(2024, 2, 1),
            lines: po_lines,
        }),
        receipts: Vec::new(),
        vendor: VendorProfile::default(),
        posted_history: Vec::new(),
    }
}

pub fn non_po_snapshot(lines: Vec<InvoiceLine>) -> InvoiceSnapshot {
    InvoiceSnapshot {
        header: header(None),
        lines,
        purchase_order: None,
        receipts: Vec::new(),
        vendor: VendorProfile::default(),
        posted_history: Vec::new(),
    }
}
