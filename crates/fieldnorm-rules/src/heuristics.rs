//! Substring fallbacks applied after both mapping passes miss.

use fieldnorm_core::NormalizableField;

/// Heuristic takes the lowercased, trimmed raw value.
pub type Heuristic = fn(&str) -> Option<&'static str>;

pub fn heuristic_for(field: NormalizableField) -> Option<Heuristic> {
    match field {
        NormalizableField::StudentInformationSystem => Some(student_information_system),
        // Financial and aid columns share the same vendor ambiguity but have never
        // carried substring rules; extending them needs a data review first.
        _ => None,
    }
}

fn student_information_system(lower: &str) -> Option<&'static str> {
    if lower.contains("colleague") {
        Some("Ellucian Colleague")
    } else if lower.contains("banner") {
        Some("Ellucian Banner")
    } else if lower.contains("jenzabar") {
        if lower.contains("one") {
            Some("Jenzabar ONE")
        } else {
            Some("Jenzabar EX")
        }
    } else if lower.contains("powercampus") {
        Some("Ellucian PowerCampus")
    } else if lower.contains("campus management") || lower.contains("anthology") {
        Some("Anthology/Campus Management")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sis(v: &str) -> Option<&'static str> {
        heuristic_for(NormalizableField::StudentInformationSystem).unwrap()(v)
    }

    #[test]
    fn colleague_wins_over_later_rules() {
        assert_eq!(sis("colleague on banner hardware"), Some("Ellucian Colleague"));
    }

    #[test]
    fn jenzabar_splits_on_one() {
        assert_eq!(sis("jenzabar one legacy"), Some("Jenzabar ONE"));
        assert_eq!(sis("jenzabar legacy"), Some("Jenzabar EX"));
    }

    #[test]
    fn anthology_and_campus_management_share_a_target() {
        assert_eq!(sis("anthology student"), Some("Anthology/Campus Management"));
        assert_eq!(sis("old campus management install"), Some("Anthology/Campus Management"));
        assert_eq!(sis("powercampus 8"), Some("Ellucian PowerCampus"));
    }

    #[test]
    fn other_fields_have_no_heuristics() {
        assert!(heuristic_for(NormalizableField::FinancialSystem).is_none());
        assert!(heuristic_for(NormalizableField::FinancialAid).is_none());
        assert_eq!(sis("workday"), None);
    }
}
