//! Name comparison for Portuguese rosters.
//!
//! Names compare on their base letters first (case and diacritics folded), so
//! "Álvaro" sorts next to "Alvaro" and before "Bruno". Names that fold to the
//! same base then compare with unaccented before accented, then lowercase
//! before uppercase, which keeps the order total and reproducible.

use std::cmp::Ordering;

/// Base letter for Latin characters used in Portuguese (and common
/// Spanish/French names on the roster).
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        'ý' | 'ÿ' | 'Ý' => 'y',
        other => other.to_lowercase().next().unwrap_or(other),
    }
}

pub fn fold(name: &str) -> String {
    name.trim().chars().map(fold_char).collect()
}

/// Case-insensitive, accent-aware comparison of two display names.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.trim(), b.trim());

    fold(a)
        .cmp(&fold(b))
        .then_with(|| compare_accents(a, b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}

/// Secondary level: at the first position where accents differ, the plain
/// letter wins.
fn compare_accents(a: &str, b: &str) -> Ordering {
    for (ca, cb) in a.chars().zip(b.chars()) {
        let accented_a = is_accented(ca);
        let accented_b = is_accented(cb);
        if accented_a != accented_b {
            return if accented_a {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
    }
    Ordering::Equal
}

fn is_accented(c: char) -> bool {
    let lower = c.to_lowercase().next().unwrap_or(c);
    fold_char(c) != lower
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_case_and_accents_at_primary_level() {
        assert_eq!(compare_names("álvaro", "Bruno"), Ordering::Less);
        assert_eq!(compare_names("Érica", "Eduardo"), Ordering::Greater);
        assert_eq!(compare_names("ana", "Beatriz"), Ordering::Less);
        assert_eq!(compare_names("Ângela", "Antônio"), Ordering::Less);
    }

    #[test]
    fn plain_letter_sorts_before_accented_twin() {
        assert_eq!(compare_names("Jose", "José"), Ordering::Less);
        assert_eq!(compare_names("José", "Jose"), Ordering::Greater);
    }

    #[test]
    fn case_only_differences_are_still_ordered() {
        assert_eq!(compare_names("ana", "Ana"), Ordering::Less);
        assert_eq!(compare_names("Ana", "ana"), Ordering::Greater);
        assert_eq!(compare_names("Ana", "Ana"), Ordering::Equal);
    }

    #[test]
    fn cedilla_folds_to_c() {
        assert_eq!(fold("Conceição"), "conceicao");
        assert_eq!(compare_names("Conceição", "Conceicao Z"), Ordering::Less);
    }
}
