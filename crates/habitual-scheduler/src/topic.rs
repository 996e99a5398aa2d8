//! Broadcast topic names.

use habitual_store::ChallengeKind;

/// Topic for every device of `kind` in `timezone`, e.g. `ninety_America_New_York`.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, so distinct zones can share
/// a topic only if they differ solely in punctuation.
pub fn topic_for(kind: ChallengeKind, timezone: &str) -> String {
    let zone: String = timezone
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}", kind.as_str(), zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ChallengeKind::Ninety, "America/New_York", "ninety_America_New_York")]
    #[test_case(ChallengeKind::Thirty, "UTC", "thirty_UTC")]
    #[test_case(ChallengeKind::Replacement, "America/Port-au-Prince", "replacement_America_Port_au_Prince")]
    #[test_case(ChallengeKind::Ninety, "Etc/GMT+5", "ninety_Etc_GMT_5")]
    #[test_case(ChallengeKind::Thirty, "", "thirty_")]
    fn test_topic_for(kind: ChallengeKind, zone: &str, expected: &str) {
        assert_eq!(topic_for(kind, zone), expected);
    }

    #[test]
    fn test_non_ascii_is_replaced() {
        assert_eq!(topic_for(ChallengeKind::Ninety, "Zoné"), "ninety_Zon_");
    }
}
