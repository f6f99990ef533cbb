//! 行匹配策略管道
//!
//! 六种策略按固定优先级逐轮执行. 每一轮按发票行号升序遍历尚未解决的行,
//! 行只能占用之前没有被任何策略占用的PO行. 某行一旦被第N种策略解决,
//! 后续策略不再处理该行.

use bigdecimal::BigDecimal;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::EngineError;
use crate::models::{InvoiceLine, InvoiceSnapshot, MatchResult, PurchaseOrder, PurchaseOrderLine};

use super::decision::validate_result;
use super::scorer::percent_change;
use super::similarity::{jaccard, tokenize};

/// qty-price 策略的数量/单价容差 (%)
pub const QTY_PRICE_TOLERANCE_PCT: f64 = 2.0;

/// 匹配策略, 声明顺序即优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    KeyBased,
    VendorMaterial,
    Semantic,
    QtyPrice,
    GrXref,
    Elimination,
}

impl StrategyId {
    pub const ORDERED: [StrategyId; 6] = [
        Self::KeyBased,
        Self::VendorMaterial,
        Self::Semantic,
        Self::QtyPrice,
        Self::GrXref,
        Self::Elimination,
    ];

    /// 策略满分置信度
    pub fn weight(self) -> u8 {
        match self {
            Self::KeyBased => 100,
            Self::VendorMaterial => 90,
            Self::Semantic => 75,
            Self::QtyPrice => 70,
            Self::GrXref => 65,
            Self::Elimination => 40,
        }
    }

    /// 认领PO行所需的最低置信度
    pub fn floor(self) -> u8 {
        match self {
            Self::KeyBased => 100,
            Self::VendorMaterial => 80,
            Self::Semantic => 60,
            Self::QtyPrice => 55,
            Self::GrXref => 50,
            Self::Elimination => 30,
        }
    }

    /// matched 状态允许的最大差异 (%)
    pub fn tolerance_pct(self) -> f64 {
        match self {
            Self::KeyBased | Self::VendorMaterial | Self::GrXref => 5.0,
            Self::Semantic | Self::QtyPrice => QTY_PRICE_TOLERANCE_PCT,
            Self::Elimination => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyBased => "key-based",
            Self::VendorMaterial => "vendor-material",
            Self::Semantic => "semantic",
            Self::QtyPrice => "qty-price",
            Self::GrXref => "gr-xref",
            Self::Elimination => "elimination",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 策略给出的候选
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    po_line: i32,
    raw_confidence: u8,
}

/// 一行的认领结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub po_line: i32,
    pub strategy: StrategyId,
    pub raw_confidence: u8,
}

/// 管道对每个发票行的输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineOutcome {
    Assigned(Assignment),
    Unmatched,
    Unplanned,
}

/// PO行及其预计算的描述词集合
struct PoEntry<'a> {
    line: &'a PurchaseOrderLine,
    tokens: BTreeSet<String>,
}

/// 单张发票的匹配上下文: PO行池 + 收货索引 + 占用状态
struct ClaimBoard<'a> {
    entries: Vec<PoEntry<'a>>,                                   // 按行号升序
    receipts: BTreeMap<&'a str, BTreeMap<i32, BigDecimal>>,    // 收货凭证 -> PO行 -> 收货数量
    claimed: IndexSet<i32>,                                      // 保序: 占用顺序
    assignments: BTreeMap<i32, Assignment>,                      // 发票行号 -> 认领结果
}

impl<'a> ClaimBoard<'a> {
    fn new(po: &'a PurchaseOrder, snapshot: &'a InvoiceSnapshot) -> Self {
        let mut entries: Vec<PoEntry<'a>> = po
            .lines
            .iter()
            .map(|line| PoEntry {
                line,
                tokens: tokenize(&line.description),
            })
            .collect();
        entries.sort_by_key(|e| e.line.line_num);

        let mut receipts: BTreeMap<&'a str, BTreeMap<i32, BigDecimal>> = BTreeMap::new();
        for gr in &snapshot.receipts {
            if let Some(po_line) = gr.po_line_num {
                *receipts
                    .entry(gr.gr_document.as_str())
                    .or_default()
                    .entry(po_line)
                    .or_insert_with(|| BigDecimal::from(0)) += &gr.received_quantity;
            }
        }

        Self {
            entries,
            receipts,
            claimed: IndexSet::new(),
            assignments: BTreeMap::new(),
        }
    }

    fn unclaimed(&self) -> impl Iterator<Item = &PoEntry<'a>> {
        self.entries
            .iter()
            .filter(|e| !self.claimed.contains(&e.line.line_num))
    }

    fn contains(&self, po_line: i32) -> bool {
        self.entries.iter().any(|e| e.line.line_num == po_line)
    }

    fn claim(&mut self, line_num: i32, assignment: Assignment) {
        self.claimed.insert(assignment.po_line);
        self.assignments.insert(line_num, assignment);
    }

    /// 某策略为某行给出的最佳候选, 同分取PO行号最小者
    fn propose(&self, strategy: StrategyId, line: &InvoiceLine) -> Option<Candidate> {
        match strategy {
            StrategyId::KeyBased => self.propose_key(line),
            StrategyId::VendorMaterial => self.propose_material(line),
            StrategyId::Semantic => self.propose_semantic(line),
            StrategyId::QtyPrice => self.propose_qty_price(line),
            StrategyId::GrXref => self.propose_gr_xref(line),
            // 消元法需要全局视角, 在管道末尾单独处理
            StrategyId::Elimination => None,
        }
    }

    fn propose_key(&self, line: &InvoiceLine) -> Option<Candidate> {
        let referenced = line.po_line_ref?;
        if !self.contains(referenced) {
            tracing::warn!(
                "Invoice {} line {}: referenced PO line {} not found, falling through",
                line.invoice_id, line.line_num, referenced
            );
            return None;
        }
        self.unclaimed()
            .find(|e| e.line.line_num == referenced)
            .map(|e| Candidate {
                po_line: e.line.line_num,
                raw_confidence: StrategyId::KeyBased.weight(),
            })
    }

    fn propose_material(&self, line: &InvoiceLine) -> Option<Candidate> {
        let code = normalize_code(line.material_code.as_deref()?)?;
        self.unclaimed()
            .find(|e| e.line.material_code.as_deref().and_then(normalize_code) == Some(code.clone()))
            .map(|e| Candidate {
                po_line: e.line.line_num,
                raw_confidence: StrategyId::VendorMaterial.weight(),
            })
    }

    fn propose_semantic(&self, line: &InvoiceLine) -> Option<Candidate> {
        let tokens = tokenize(&line.description);
        let mut best: Option<(i32, f64)> = None;

        for entry in self.unclaimed() {
            let sim = jaccard(&tokens, &entry.tokens);
            if sim <= 0.0 {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((_, best_sim)) => sim > best_sim,
            };
            if is_better {
                best = Some((entry.line.line_num, sim));
            }
        }

        best.map(|(po_line, sim)| Candidate {
            po_line,
            raw_confidence: scale(StrategyId::Semantic.weight(), sim),
        })
    }

    fn propose_qty_price(&self, line: &InvoiceLine) -> Option<Candidate> {
        let mut best: Option<(i32, f64)> = None;

        for entry in self.unclaimed() {
            let qty_dev = percent_change(&line.quantity, &entry.line.quantity).abs();
            let price_dev = percent_change(&line.unit_price, &entry.line.unit_price).abs();
            if qty_dev > QTY_PRICE_TOLERANCE_PCT || price_dev > QTY_PRICE_TOLERANCE_PCT {
                continue;
            }
            let dev = qty_dev.max(price_dev);
            let is_better = match best {
                None => true,
                Some((_, best_dev)) => dev < best_dev,
            };
            if is_better {
                best = Some((entry.line.line_num, dev));
            }
        }

        // 偏差 0 -> 70, 偏差达到容差 -> 55
        best.map(|(po_line, dev)| {
            let penalty = (dev * 7.5).round().clamp(0.0, 255.0) as u8;
            Candidate {
                po_line,
                raw_confidence: StrategyId::QtyPrice.weight().saturating_sub(penalty),
            }
        })
    }

    fn propose_gr_xref(&self, line: &InvoiceLine) -> Option<Candidate> {
        let document = line.gr_document_ref.as_deref()?;
        let by_po_line = self.receipts.get(document)?;

        by_po_line.iter().find_map(|(po_line, received)| {
            let available = self.unclaimed().any(|e| e.line.line_num == *po_line);
            if !available {
                return None;
            }
            let raw_confidence = if *received == line.quantity {
                StrategyId::GrXref.weight()
            } else {
                StrategyId::GrXref.floor()
            };
            Some(Candidate {
                po_line: *po_line,
                raw_confidence,
            })
        })
    }
}

fn normalize_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// round_half_up(weight * ratio)
fn scale(weight: u8, ratio: f64) -> u8 {
    (f64::from(weight) * ratio).round().clamp(0.0, f64::from(weight)) as u8
}

/// 对发票执行策略管道, 输出与 `snapshot.lines` 顺序一致
pub fn match_lines(snapshot: &InvoiceSnapshot) -> Result<Vec<LineOutcome>, EngineError> {
    match_lines_with_prior(snapshot, &[])
}

/// 以上一轮的匹配结果为起点重新匹配
///
/// 上一轮已匹配的行保留其PO行/策略/原始置信度, 其余行重新走管道.
pub fn match_lines_with_prior(
    snapshot: &InvoiceSnapshot,
    prior: &[MatchResult],
) -> Result<Vec<LineOutcome>, EngineError> {
    check_prior(snapshot, prior)?;

    if snapshot.is_non_po() {
        if let Some(stale) = prior.iter().find(|r| r.po_line.is_some()) {
            return Err(EngineError::inconsistent(
                stale.line_num,
                "prior result references a PO line on a non-PO invoice",
            ));
        }
        tracing::debug!(
            "Invoice {}: no purchase order referenced, {} lines unplanned",
            snapshot.header.invoice_id,
            snapshot.lines.len()
        );
        return Ok(vec![LineOutcome::Unplanned; snapshot.lines.len()]);
    }

    let po = snapshot
        .purchase_order
        .as_ref()
        .ok_or_else(|| EngineError::MissingPurchaseOrder {
            invoice_id: snapshot.header.invoice_id.clone(),
            po_number: snapshot.header.po_number.clone().unwrap_or_default(),
        })?;

    let mut board = ClaimBoard::new(po, snapshot);
    seed_prior(&mut board, po, prior)?;

    // 行号升序
    let mut ordered: Vec<&InvoiceLine> = snapshot.lines.iter().collect();
    ordered.sort_by_key(|l| l.line_num);

    for strategy in StrategyId::ORDERED {
        if strategy == StrategyId::Elimination {
            eliminate(&mut board, &ordered);
            continue;
        }

        for line in &ordered {
            if board.assignments.contains_key(&line.line_num) {
                continue;
            }
            let Some(candidate) = board.propose(strategy, line) else {
                continue;
            };
            if candidate.raw_confidence < strategy.floor() {
                continue;
            }
            tracing::debug!(
                "Invoice {} line {}: {} claimed PO line {} (raw {})",
                line.invoice_id, line.line_num, strategy, candidate.po_line, candidate.raw_confidence
            );
            board.claim(
                line.line_num,
                Assignment {
                    po_line: candidate.po_line,
                    strategy,
                    raw_confidence: candidate.raw_confidence,
                },
            );
        }
    }

    Ok(snapshot
        .lines
        .iter()
        .map(|line| match board.assignments.get(&line.line_num) {
            Some(a) => LineOutcome::Assigned(*a),
            None => LineOutcome::Unmatched,
        })
        .collect())
}

/// 仅剩一个未解决发票行和一个未占用PO行时直接配对
fn eliminate(board: &mut ClaimBoard<'_>, ordered: &[&InvoiceLine]) {
    let open_lines: Vec<i32> = ordered
        .iter()
        .map(|l| l.line_num)
        .filter(|n| !board.assignments.contains_key(n))
        .collect();
    let open_po: Vec<i32> = board.unclaimed().map(|e| e.line.line_num).collect();

    if let ([line_num], [po_line]) = (open_lines.as_slice(), open_po.as_slice()) {
        let strategy = StrategyId::Elimination;
        if strategy.weight() >= strategy.floor() {
            board.claim(
                *line_num,
                Assignment {
                    po_line: *po_line,
                    strategy,
                    raw_confidence: strategy.weight(),
                },
            );
        }
    }
}

/// 上一轮结果必须逐条自洽, 且与本张发票的行一一对应
fn check_prior(snapshot: &InvoiceSnapshot, prior: &[MatchResult]) -> Result<(), EngineError> {
    let mut seen = BTreeSet::new();
    for result in prior {
        if result.invoice_id != snapshot.header.invoice_id {
            return Err(EngineError::inconsistent(
                result.line_num,
                format!(
                    "prior result belongs to invoice {}, expected {}",
                    result.invoice_id, snapshot.header.invoice_id
                ),
            ));
        }
        if !seen.insert(result.line_num) {
            return Err(EngineError::inconsistent(
                result.line_num,
                "more than one prior result for the same line",
            ));
        }
        if !snapshot.lines.iter().any(|l| l.line_num == result.line_num) {
            return Err(EngineError::inconsistent(
                result.line_num,
                "prior result refers to a line that is not on the invoice",
            ));
        }
        if result.po_line.is_some() != result.strategy.is_some() {
            return Err(EngineError::inconsistent(
                result.line_num,
                "prior result must carry both a PO line and a strategy, or neither",
            ));
        }
        validate_result(result)?;
    }
    Ok(())
}

/// 预先占用上一轮的匹配 (调用前已通过 `check_prior`)
fn seed_prior(
    board: &mut ClaimBoard<'_>,
    po: &PurchaseOrder,
    prior: &[MatchResult],
) -> Result<(), EngineError> {
    for result in prior {
        let (Some(po_ref), Some(strategy)) = (&result.po_line, result.strategy) else {
            continue;
        };
        if po_ref.po_number != po.po_number || !board.contains(po_ref.line_num) {
            return Err(EngineError::UnknownPoLine {
                line_num: result.line_num,
                po_number: po_ref.po_number.clone(),
                po_line: po_ref.line_num,
            });
        }
        if board.claimed.contains(&po_ref.line_num) {
            return Err(EngineError::inconsistent(
                result.line_num,
                format!("PO line {po_ref} is claimed by more than one prior result"),
            ));
        }
        board.claim(
            result.line_num,
            Assignment {
                po_line: po_ref.line_num,
                strategy,
                raw_confidence: result.raw_confidence,
            },
        );
    }
    Ok(())
}
