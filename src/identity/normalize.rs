//! Natural-key normalization

/// Normalize a name or filename into a natural key.
///
/// Lower-cases, trims, drops every character that is neither alphanumeric
/// nor whitespace, and collapses whitespace runs to a single space.
/// Returns `None` when nothing alphanumeric remains.
///
/// ```
/// use casesync::identity::normalize_natural_key;
///
/// assert_eq!(normalize_natural_key("  John   Smith "), Some("john smith".to_string()));
/// assert_eq!(normalize_natural_key("witness_smith.pdf"), Some("witnesssmithpdf".to_string()));
/// assert_eq!(normalize_natural_key(" -- "), None);
/// ```
pub fn normalize_natural_key(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else if ch.is_whitespace() {
            pending_space = true;
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_is_dropped_not_spaced() {
        assert_eq!(
            normalize_natural_key("J. Smith Statement").as_deref(),
            Some("j smith statement")
        );
        assert_eq!(
            normalize_natural_key("Witness_Smith.PDF").as_deref(),
            Some("witnesssmithpdf")
        );
    }

    #[test]
    fn case_and_spacing_variants_agree() {
        assert_eq!(
            normalize_natural_key("John Smith"),
            normalize_natural_key("  john\tsmith")
        );
    }

    #[test]
    fn minor_filename_variants_stay_distinct() {
        assert_ne!(
            normalize_natural_key("witness_smith.pdf"),
            normalize_natural_key("witness_smith (1).pdf")
        );
    }

    #[test]
    fn empty_and_symbol_only_keys_are_none() {
        assert_eq!(normalize_natural_key(""), None);
        assert_eq!(normalize_natural_key("   "), None);
        assert_eq!(normalize_natural_key("._-"), None);
    }

    #[test]
    fn non_ascii_letters_survive() {
        assert_eq!(
            normalize_natural_key("Müller, Zoë").as_deref(),
            Some("müller zoë")
        );
    }
}
