mod common;

use common::*;
use invoice_autopilot::engine::scorer::line_confidence;
use invoice_autopilot::engine::{
    evaluate_invoice, evaluate_with_prior, GuardrailSet, StrategyId,
};
use invoice_autopilot::models::{Eligibility, InvoiceSnapshot};
use proptest::prelude::*;
use std::collections::BTreeSet;

const WORDS: &[&str] = &[
    "paper", "toner", "cable", "bolt", "gloves", "lamp", "chair", "desk", "pallet", "wrap",
];
const CODES: &[&str] = &["M-1", "M-2", "M-3"];

#[derive(Debug, Clone)]
struct LineSpec {
    words: (usize, usize),
    qty: u32,
    price_cents: u32,
    po_ref: Option<i32>,
    code: Option<usize>,
}

fn arb_line() -> impl Strategy<Value = LineSpec> {
    (
        (0..WORDS.len(), 0..WORDS.len()),
        1u32..20,
        100u32..5000,
        proptest::option::of((1i32..6).prop_map(|n| n * 10)),
        proptest::option::of(0..CODES.len()),
    )
        .prop_map(|(words, qty, price_cents, po_ref, code)| LineSpec {
            words,
            qty,
            price_cents,
            po_ref,
            code,
        })
}

fn price(cents: u32) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn build(invoice: &[LineSpec], po: &[LineSpec]) -> InvoiceSnapshot {
    let lines = invoice
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let desc = format!("{} {}", WORDS[spec.words.0], WORDS[spec.words.1]);
            let mut line = inv_line(i as i32 + 1, &desc, &spec.qty.to_string(), &price(spec.price_cents));
            line.po_line_ref = spec.po_ref;
            line.material_code = spec.code.map(|c| CODES[c].to_string());
            line
        })
        .collect();
    let po_lines = po
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let desc = format!("{} {}", WORDS[spec.words.0], WORDS[spec.words.1]);
            let mut line = po_line((i as i32 + 1) * 10, &desc, &spec.qty.to_string(), &price(spec.price_cents));
            line.material_code = spec.code.map(|c| CODES[c].to_string());
            line
        })
        .collect();
    po_snapshot(lines, po_lines)
}

fn arb_snapshot() -> impl Strategy<Value = InvoiceSnapshot> {
    (
        proptest::collection::vec(arb_line(), 0..6),
        proptest::collection::vec(arb_line(), 0..6),
    )
        .prop_map(|(invoice, po)| build(&invoice, &po))
}

proptest! {
    #[test]
    fn evaluation_is_deterministic(snapshot in arb_snapshot(), t in 50i64..=100) {
        let set = GuardrailSet::default();
        let a = evaluate_invoice(&snapshot, &set, threshold(t)).unwrap();
        let b = evaluate_invoice(&snapshot, &set, threshold(t)).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    /// 有效的PO行号引用由行号最小的发票行通过 key-based 认领
    #[test]
    fn key_references_take_priority(snapshot in arb_snapshot()) {
        let set = GuardrailSet::default();
        let eval = evaluate_invoice(&snapshot, &set, threshold(95)).unwrap();
        let po_lines: BTreeSet<i32> = snapshot
            .purchase_order
            .as_ref()
            .map(|po| po.lines.iter().map(|l| l.line_num).collect())
            .unwrap_or_default();

        let mut taken = BTreeSet::new();
        for (line, result) in snapshot.lines.iter().zip(&eval.results) {
            if let Some(r) = line.po_line_ref {
                if po_lines.contains(&r) && taken.insert(r) {
                    prop_assert_eq!(result.strategy, Some(StrategyId::KeyBased));
                    prop_assert_eq!(result.po_line.as_ref().map(|p| p.line_num), Some(r));
                }
            }
        }
    }

    #[test]
    fn no_po_line_is_claimed_twice(snapshot in arb_snapshot()) {
        let eval = evaluate_invoice(&snapshot, &GuardrailSet::default(), threshold(95)).unwrap();
        let mut claimed = BTreeSet::new();
        for result in &eval.results {
            if let Some(po_ref) = &result.po_line {
                prop_assert!(claimed.insert(po_ref.line_num));
            }
        }
    }

    #[test]
    fn confidence_is_monotone_in_variance(raw in 0u8..=100, a in -500.0f64..500.0, b in -500.0f64..500.0) {
        let (small, large) = if a.abs() <= b.abs() { (a, b) } else { (b, a) };
        prop_assert!(line_confidence(raw, small) >= line_confidence(raw, large));
    }

    #[test]
    fn larger_price_variance_never_raises_confidence(bump_a in 0u32..2000, bump_b in 0u32..2000) {
        let (low, high) = if bump_a <= bump_b { (bump_a, bump_b) } else { (bump_b, bump_a) };
        let confidence = |bump: u32| {
            let mut line = inv_line(1, "copy paper", "2", &price(10_000 + bump));
            line.po_line_ref = Some(10);
            let snapshot = po_snapshot(vec![line], vec![po_line(10, "copy paper", "2", "100")]);
            evaluate_invoice(&snapshot, &GuardrailSet::default(), threshold(95))
                .unwrap()
                .results[0]
                .confidence
        };
        prop_assert!(confidence(low) >= confidence(high));
    }

    #[test]
    fn hard_guardrail_always_blocks(mut snapshot in arb_snapshot(), t in 50i64..=100) {
        snapshot.vendor.payment_block = true;
        let eval = evaluate_invoice(&snapshot, &GuardrailSet::default(), threshold(t)).unwrap();
        for decision in &eval.decisions {
            prop_assert_eq!(decision.eligibility, Eligibility::Blocked);
        }
        if !snapshot.lines.is_empty() {
            prop_assert_eq!(eval.invoice_decision.eligibility, Eligibility::Blocked);
        }
    }

    #[test]
    fn invoice_autopilots_iff_every_line_does(snapshot in arb_snapshot(), t in 50i64..=100) {
        let eval = evaluate_invoice(&snapshot, &GuardrailSet::default(), threshold(t)).unwrap();
        let all_auto = !eval.decisions.is_empty()
            && eval.decisions.iter().all(|d| d.eligibility == Eligibility::Autopilot);
        prop_assert_eq!(
            eval.invoice_decision.eligibility == Eligibility::Autopilot,
            all_auto
        );
    }

    #[test]
    fn rescoring_prior_output_is_stable(snapshot in arb_snapshot()) {
        let set = GuardrailSet::default();
        let first = evaluate_invoice(&snapshot, &set, threshold(95)).unwrap();
        let again = evaluate_with_prior(&snapshot, &first.results, &set, threshold(95)).unwrap();
        prop_assert_eq!(first, again);
    }
}
