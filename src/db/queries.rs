use crate::models::{
    GoodsReceiptRecord, InvoiceHeader, InvoiceLine, PostedInvoice, PurchaseOrder,
    PurchaseOrderHeader, PurchaseOrderLine, VendorProfile,
};
use sqlx::PgPool;

/// 查询发票抬头
pub async fn get_invoice(
    pool: &PgPool,
    invoice_id: &str,
) -> Result<Option<InvoiceHeader>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceHeader>(
        r#"
        SELECT invoice_id, vendor_id, vendor_reference, invoice_date, po_number, currency
        FROM ap_invoice
        WHERE invoice_id = $1
        "#
    )
    .bind(invoice_id)
    .fetch_optional(pool)
    .await
}

/// 查询发票明细 (按行号升序)
pub async fn list_invoice_lines(
    pool: &PgPool,
    invoice_id: &str,
) -> Result<Vec<InvoiceLine>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceLine>(
        r#"
        SELECT invoice_id, line_num, description, quantity, unit_of_measure,
               unit_price, amount, po_line_ref, gr_document_ref, material_code
        FROM ap_invoice_line
        WHERE invoice_id = $1
        ORDER BY line_num ASC
        "#
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await
}

/// 查询采购订单抬头
pub async fn get_purchase_order_header(
    pool: &PgPool,
    po_number: &str,
) -> Result<Option<PurchaseOrderHeader>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseOrderHeader>(
        r#"
        SELECT po_number, vendor_id, created_date
        FROM po_header
        WHERE po_number = $1
        "#
    )
    .bind(po_number)
    .fetch_optional(pool)
    .await
}

/// 查询采购订单行
pub async fn list_purchase_order_lines(
    pool: &PgPool,
    po_numbers: &[String],
) -> Result<Vec<PurchaseOrderLine>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseOrderLine>(
        r#"
        SELECT po_number, line_num, description, quantity, unit_price,
               material_code, cost_center
        FROM po_line
        WHERE po_number = ANY($1)
        ORDER BY po_number, line_num ASC
        "#
    )
    .bind(po_numbers)
    .fetch_all(pool)
    .await
}

/// 查询采购订单 (抬头 + 行)
pub async fn get_purchase_order(
    pool: &PgPool,
    po_number: &str,
) -> Result<Option<PurchaseOrder>, sqlx::Error> {
    let Some(header) = get_purchase_order_header(pool, po_number).await? else {
        return Ok(None);
    };
    let lines = list_purchase_order_lines(pool, &[po_number.to_string()]).await?;
    Ok(Some(PurchaseOrder::new(header, lines)))
}

/// 供应商未关闭的采购订单 - 候选PO排名用
pub async fn list_open_purchase_orders(
    pool: &PgPool,
    vendor_id: &str,
) -> Result<Vec<PurchaseOrder>, sqlx::Error> {
    let headers = sqlx::query_as::<_, PurchaseOrderHeader>(
        r#"
        SELECT po_number, vendor_id, created_date
        FROM po_header
        WHERE vendor_id = $1
          AND closed = false
        ORDER BY po_number
        "#
    )
    .bind(vendor_id)
    .fetch_all(pool)
    .await?;

    if headers.is_empty() {
        return Ok(Vec::new());
    }

    let numbers: Vec<String> = headers.iter().map(|h| h.po_number.clone()).collect();
    let mut lines = list_purchase_order_lines(pool, &numbers).await?;

    Ok(headers
        .into_iter()
        .map(|header| {
            let (own, rest): (Vec<_>, Vec<_>) = lines
                .drain(..)
                .partition(|l| l.po_number == header.po_number);
            lines = rest;
            PurchaseOrder::new(header, own)
        })
        .collect())
}

/// 查询收货凭证记录 (发票行引用的凭证)
pub async fn list_goods_receipts(
    pool: &PgPool,
    gr_documents: &[String],
) -> Result<Vec<GoodsReceiptRecord>, sqlx::Error> {
    if gr_documents.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, GoodsReceiptRecord>(
        r#"
        SELECT gr_document, line_num, po_line_num, received_quantity, received_date
        FROM gr_record
        WHERE gr_document = ANY($1)
        ORDER BY gr_document, line_num
        "#
    )
    .bind(gr_documents)
    .fetch_all(pool)
    .await
}

/// 查询供应商档案, 不存在时返回默认 (无冻结, 无评分)
pub async fn get_vendor_profile(
    pool: &PgPool,
    vendor_id: &str,
) -> Result<VendorProfile, sqlx::Error> {
    let profile = sqlx::query_as::<_, VendorProfile>(
        r#"
        SELECT payment_block, reliability_score
        FROM vendor_master
        WHERE vendor_id = $1
        "#
    )
    .bind(vendor_id)
    .fetch_optional(pool)
    .await?;

    Ok(profile.unwrap_or_default())
}

/// 查询同一供应商已过账的其他发票
pub async fn list_posted_invoices(
    pool: &PgPool,
    vendor_id: &str,
    exclude_invoice_id: &str,
) -> Result<Vec<PostedInvoice>, sqlx::Error> {
    sqlx::query_as::<_, PostedInvoice>(
        r#"
        SELECT vendor_id, vendor_reference, po_number, total_amount
        FROM ap_posted_invoice
        WHERE vendor_id = $1
          AND invoice_id <> $2
        "#
    )
    .bind(vendor_id)
    .bind(exclude_invoice_id)
    .fetch_all(pool)
    .await
}
