//! Resolves free-text company activity / enrichment segment hints to a
//! CEST segment id, the closed vocabulary `cest_rule.segment_id` is drawn
//! from (spec §4.4.1, §4.4.4: "Segment tags are a closed vocabulary aligned
//! with CEST segments; free text is mapped by EnrichmentAgent").

/// `(segment_id, aliases)` — aliases are lowercased, accent-stripped
/// substrings recognised as referring to that segment.
const SEGMENTS: &[(&str, &[&str])] = &[
    ("01", &["autopeca", "auto peca", "peca automotiv"]),
    ("13", &["medicamento", "farmacia", "farmaceutic", "drogaria"]),
    ("18", &["papelaria"]),
    ("28", &["porta a porta", "venda porta", "revendedor autonomo"]),
];

/// Resolves a segment id, preferring `segment_hint` (EnrichmentAgent's
/// already-mapped output) over the raw `company_activity` text.
pub fn resolve_segment_id(segment_hint: Option<&str>, company_activity: Option<&str>) -> Option<String> {
    segment_hint.and_then(resolve_one).or_else(|| company_activity.and_then(resolve_one))
}

fn resolve_one(text: &str) -> Option<String> {
    let normalised = normalise(text);
    if normalised.is_empty() {
        return None;
    }
    // An already-canonical 2-digit segment id (e.g. the LLM echoed "13"
    // verbatim) is accepted as-is rather than run through alias matching.
    if normalised.len() == 2 && normalised.chars().all(|c| c.is_ascii_digit()) {
        return Some(normalised);
    }
    SEGMENTS
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|alias| normalised.contains(alias)))
        .map(|(id, _)| id.to_string())
}

fn normalise(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c.to_ascii_lowercase() {
            'á' | 'à' | 'â' | 'ã' => Some('a'),
            'é' | 'ê' => Some('e'),
            'í' => Some('i'),
            'ó' | 'ô' | 'õ' => Some('o'),
            'ú' => Some('u'),
            'ç' => Some('c'),
            c if c.is_ascii_alphanumeric() || c.is_whitespace() => Some(c),
            _ => None,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_aliases() {
        assert_eq!(resolve_segment_id(None, Some("farmácia")).as_deref(), Some("13"));
        assert_eq!(resolve_segment_id(None, Some("papelaria varejista")).as_deref(), Some("18"));
        assert_eq!(resolve_segment_id(None, Some("venda porta a porta")).as_deref(), Some("28"));
        assert_eq!(resolve_segment_id(None, Some("autopeças")).as_deref(), Some("01"));
    }

    #[test]
    fn segment_hint_takes_precedence_over_company_activity() {
        assert_eq!(resolve_segment_id(Some("13"), Some("papelaria")).as_deref(), Some("13"));
    }

    #[test]
    fn unrecognised_text_resolves_to_none() {
        assert_eq!(resolve_segment_id(None, Some("comércio geral")), None);
        assert_eq!(resolve_segment_id(None, None), None);
    }
}
