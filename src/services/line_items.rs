//! Line-item extraction from `ligne<N>_<subfield>` columns.

use crate::models::placeholders::{
    line_column, LINE_DESIGNATION, LINE_QUANTITY, LINE_TYPE, LINE_UNIT, LINE_UNIT_PRICE, MAX_LINES,
};
use crate::types::LineItem;

/// Float with `,` or `.` as decimal separator, `None` when unparseable.
/// Every amount read from user input or history goes through here.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

/// Best-effort float parse, `0.0` on failure.
pub fn parse_amount(raw: &str) -> f64 {
    parse_decimal(raw).unwrap_or(0.0)
}

/// Build up to five line items from a raw field lookup.
///
/// An index whose five sub-fields are all empty produces nothing. Output
/// numbers are dense (1, 2, ...) over the items actually produced.
pub fn build_line_items<'a, F>(lookup: F) -> Vec<LineItem>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut lines = Vec::new();
    for idx in 1..=MAX_LINES {
        let get = |sub: &str| lookup(&line_column(idx, sub)).unwrap_or("").trim();
        let designation = get(LINE_DESIGNATION);
        let kind = get(LINE_TYPE);
        let unit = get(LINE_UNIT);
        let quantity_raw = get(LINE_QUANTITY);
        let unit_price_raw = get(LINE_UNIT_PRICE);

        if [designation, kind, unit, quantity_raw, unit_price_raw]
            .iter()
            .all(|s| s.is_empty())
        {
            continue;
        }

        let quantity = parse_amount(quantity_raw);
        let unit_price = parse_amount(unit_price_raw);
        lines.push(LineItem {
            number: lines.len() as u32 + 1,
            designation: designation.to_string(),
            kind: kind.to_string(),
            unit: unit.to_string(),
            quantity,
            unit_price,
            amount: quantity * unit_price,
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn build(map: &HashMap<String, String>) -> Vec<LineItem> {
        build_line_items(|k| map.get(k).map(String::as_str))
    }

    #[test]
    fn decimal_separators() {
        assert_eq!(parse_amount("3,5"), 3.5);
        assert_eq!(parse_amount("3.5"), 3.5);
        assert_eq!(parse_amount(" 12 "), 12.0);
        assert_eq!(parse_amount("abc"), 0.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("1,000.50"), 0.0);
    }

    #[test]
    fn empty_groups_are_skipped_and_numbers_stay_dense() {
        let map = fields(&[
            ("ligne2_designation", "Audit"),
            ("ligne2_quantite", "2"),
            ("ligne2_prix_unitaire", "100"),
            ("ligne4_unite", "H"),
            ("ligne4_quantite", "1,5"),
            ("ligne4_prix_unitaire", "10"),
        ]);
        let lines = build(&map);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[0].designation, "Audit");
        assert_eq!(lines[0].amount, 200.0);
        assert_eq!(lines[1].number, 2);
        assert_eq!(lines[1].unit, "H");
        assert_eq!(lines[1].amount, 15.0);
    }

    #[test]
    fn whitespace_only_group_counts_as_empty() {
        let map = fields(&[("ligne1_designation", "   "), ("ligne1_quantite", "")]);
        assert!(build(&map).is_empty());
    }

    #[test]
    fn amount_is_quantity_times_price() {
        let pairs = [(0.1, 3.0), (7.0, 0.3), (2.5, 1999.99), (0.0, 42.0)];
        for (q, p) in pairs {
            let map = fields(&[
                ("ligne1_designation", "x"),
                ("ligne1_quantite", q.to_string().as_str()),
                ("ligne1_prix_unitaire", p.to_string().as_str()),
            ]);
            let lines = build(&map);
            assert_eq!(lines[0].amount, q * p);
        }
    }

    #[test]
    fn unparseable_numbers_default_to_zero() {
        let map = fields(&[
            ("ligne1_designation", "Forfait"),
            ("ligne1_quantite", "deux"),
            ("ligne1_prix_unitaire", "100"),
        ]);
        let lines = build(&map);
        assert_eq!(lines[0].quantity, 0.0);
        assert_eq!(lines[0].amount, 0.0);
    }

    #[test]
    fn ignores_groups_beyond_five() {
        let map = fields(&[("ligne6_designation", "Hors limite")]);
        assert!(build(&map).is_empty());
    }
}
