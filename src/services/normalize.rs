//! Column-name canonicalization and alias lookup.

use crate::models::placeholders::PLACEHOLDER_ALIASES;

/// Unaccented equivalent of a lowercase accented letter.
fn fold_accent(c: char) -> Option<char> {
    let plain = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        _ => return None,
    };
    Some(plain)
}

/// Canonicalize a raw column or field name into a lookup key.
///
/// Trims, lowercases, folds accents, turns every run of characters outside
/// `[a-z0-9]` into a single `_`, then strips leading/trailing `_`.
/// Total and idempotent.
pub fn normalize_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c).unwrap_or(c);
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Canonical placeholder for a normalized key, or `None` when the key is
/// not in the alias table.
pub fn map_placeholder(key: &str) -> Option<&'static str> {
    PLACEHOLDER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_accents_and_punctuation() {
        assert_eq!(normalize_key("  Période concernée "), "periode_concernee");
        assert_eq!(normalize_key("Code Sous-Projet"), "code_sous_projet");
        assert_eq!(normalize_key("Dept/Dir. Émettrice"), "dept_dir_emettrice");
        assert_eq!(normalize_key("N° OTFI"), "n_otfi");
        assert_eq!(normalize_key("__Montant (FCFA)__"), "montant_fcfa");
    }

    #[test]
    fn degenerate_names() {
        assert_eq!(normalize_key(""), "");
        assert_eq!(normalize_key(" -- "), "");
        assert_eq!(normalize_key("ligne1_prix_unitaire"), "ligne1_prix_unitaire");
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        for raw in [
            "Période concernée",
            "CODE   PROJET",
            "Prix.Unitaire/HT",
            "Pôle Émettrice",
            "ÇA_VA?",
            "ligne3 - Quantité",
        ] {
            let once = normalize_key(raw);
            assert_eq!(normalize_key(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn aliases_are_many_to_one() {
        assert_eq!(map_placeholder("montant"), Some("somme_facture"));
        assert_eq!(map_placeholder("somme_facture"), Some("somme_facture"));
        assert_eq!(map_placeholder("periode"), Some("période_concernee"));
        assert_eq!(map_placeholder("codesousprojet"), Some("code_sous_projet"));
        assert_eq!(map_placeholder("commentaire"), None);
    }
}
