//! Conversion of configured language tags into provider-specific codes.
//! Tags may be NLLB/FLORES codes (`eng_Latn`), ISO 639-3 codes (`fra`) or
//! plain ISO 639-1 codes (`en`, `pt-BR`).

use isolang::Language;

/// FLORES tags whose ISO 639-3 code names an individual language that
/// providers only know by its macrolanguage, plus the script variants of
/// Chinese. (tag or base code, provider code, English name)
const OVERRIDES: &[(&str, &str, &str)] = &[
    ("zho_Hant", "zh-TW", "Chinese (Traditional)"),
    ("zho_Hans", "zh", "Chinese (Simplified)"),
    ("arb", "ar", "Arabic"),
    ("pes", "fa", "Persian"),
    ("zsm", "ms", "Malay"),
    ("swh", "sw", "Swahili"),
];

/// Tags offered by `--list-languages`, in the order they are printed.
pub const COMMON_TAGS: &[&str] = &[
    "eng_Latn", "nld_Latn", "fra_Latn", "deu_Latn", "spa_Latn", "ita_Latn", "por_Latn",
    "rus_Cyrl", "pol_Latn", "ukr_Cyrl", "tur_Latn", "arb_Arab", "zho_Hans", "zho_Hant",
    "jpn_Jpan", "kor_Hang", "hin_Deva", "vie_Latn", "ind_Latn", "heb_Hebr", "pes_Arab",
    "swe_Latn", "est_Latn", "kat_Geor", "swh_Latn",
];

enum Resolved {
    Override(&'static str, &'static str),
    Iso(Language),
}

fn resolve(tag: &str) -> Option<Resolved> {
    let tag = tag.trim();
    let base = tag.split(['_', '-']).next().unwrap_or(tag).to_ascii_lowercase();
    if let Some((_, code, name)) = OVERRIDES
        .iter()
        .find(|(key, _, _)| key.eq_ignore_ascii_case(tag) || *key == base)
    {
        return Some(Resolved::Override(*code, *name));
    }
    match base.len() {
        2 => Language::from_639_1(&base),
        3 => Language::from_639_3(&base),
        _ => None,
    }
    .map(Resolved::Iso)
}

/// ISO 639-1 code for a tag, falling back to ISO 639-3 for languages that
/// have no two-letter code. Region-qualified codes (`pt-BR`) and unknown
/// tags are passed through unchanged.
pub fn iso_code(tag: &str) -> String {
    if tag.contains('-') {
        return tag.to_string();
    }
    match resolve(tag) {
        Some(Resolved::Override(code, _)) => code.to_string(),
        Some(Resolved::Iso(lang)) => lang.to_639_1().unwrap_or_else(|| lang.to_639_3()).to_string(),
        None => tag.to_string(),
    }
}

/// Upper-case code in the form DeepL expects (`EN`, `ZH-HANT`).
pub fn deepl_code(tag: &str) -> String {
    match iso_code(tag).as_str() {
        "zh-TW" => "ZH-HANT".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// English display name, used in prompts for chat-based backends.
pub fn display_name(tag: &str) -> String {
    match resolve(tag) {
        Some(Resolved::Override(_, name)) => name.to_string(),
        Some(Resolved::Iso(lang)) => lang.to_name().to_string(),
        None => tag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_flores_tags() {
        assert_eq!(iso_code("nld_Latn"), "nl");
        assert_eq!(iso_code("spa_Latn"), "es");
        assert_eq!(deepl_code("spa_Latn"), "ES");
        assert_eq!(deepl_code("zho_Hant"), "ZH-HANT");
        assert_eq!(display_name("jpn_Jpan"), "Japanese");
    }

    /// Tags outside the common set still resolve through the ISO tables.
    #[test]
    fn resolves_any_iso_639_3_base() {
        assert_eq!(iso_code("est_Latn"), "et");
        assert_eq!(deepl_code("est_Latn"), "ET");
        assert_eq!(iso_code("kat_Geor"), "ka");
        assert_eq!(display_name("kat_Geor"), "Georgian");
        assert_eq!(iso_code("EST_LATN"), "et");
    }

    /// Individual languages map to the macrolanguage code providers use.
    #[test]
    fn macrolanguage_overrides() {
        assert_eq!(iso_code("swh_Latn"), "sw");
        assert_eq!(iso_code("arb_Arab"), "ar");
        assert_eq!(iso_code("pes_Arab"), "fa");
        assert_eq!(deepl_code("zsm_Latn"), "MS");
        assert_eq!(display_name("zho_Hans"), "Chinese (Simplified)");
    }

    /// Codes already in provider form and unknown tags pass through.
    #[test]
    fn passes_through_unknown() {
        assert_eq!(iso_code("de"), "de");
        assert_eq!(display_name("fr"), "French");
        assert_eq!(iso_code("xx_Test"), "xx_Test");
        assert_eq!(deepl_code("pt-BR"), "PT-BR");
        assert_eq!(display_name("pt-BR"), "Portuguese");
    }

    #[test]
    fn common_tags_all_resolve() {
        for tag in COMMON_TAGS {
            assert_ne!(display_name(tag), *tag, "{tag} has no name");
        }
    }
}
