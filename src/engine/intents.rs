//! Input normalization and the heuristic classifiers that route raw chat
//! text: menu options, farewells, the web-order payload marker, order
//! summary fields, and the "paying shortly" intent.

use regex::{Regex, RegexSet};
use std::sync::LazyLock;

/// Lowercase, fold Spanish accents, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        out.push(match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        });
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text with everything but ascii letters turned into spaces.
fn letters_only(normalized: &str) -> String {
    normalized
        .chars()
        .map(|c| if c.is_ascii_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Menu option 1–5, accepting digits and spelled Spanish numerals.
pub fn normalize_option(text: &str) -> Option<u8> {
    let norm = normalize(text);
    match norm.as_str() {
        "1" | "uno" | "un" | "una" => Some(1),
        "2" | "dos" => Some(2),
        "3" | "tres" => Some(3),
        "4" | "cuatro" => Some(4),
        "5" | "cinco" => Some(5),
        _ => None,
    }
}

/// Whether the trimmed text is a bare menu digit (immediate-dispatch class).
pub fn is_menu_digit(text: &str) -> bool {
    matches!(text.trim(), "1" | "2" | "3" | "4" | "5")
}

const WEB_ORDER_MARKER: &str = "hola cocina casera";

/// A complete web-order payload pasted from the order form.
pub fn is_web_order_payload(text: &str) -> bool {
    normalize(text).contains(WEB_ORDER_MARKER)
}

const FAREWELL_WORDS: &[&str] = &[
    "gracias",
    "muchas gracias",
    "ok gracias",
    "vale gracias",
    "perfecto gracias",
    "adios",
    "chao",
    "hasta luego",
    "nos vemos",
    "bye",
    "listo gracias",
    "ok",
    "vale",
    "perfecto",
    "entendido",
    "ok listo",
    "ya entendi",
];

/// Goodbye/acknowledgment phrases that close a conversation politely.
pub fn is_farewell(text: &str) -> bool {
    let clean = letters_only(&normalize(text));
    if clean.is_empty() {
        return false;
    }
    FAREWELL_WORDS.iter().any(|word| {
        clean == *word
            || clean.starts_with(&format!("{word} "))
            || clean.ends_with(&format!(" {word}"))
    })
}

static ORDER_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"💰\s*Total:\s*\$\s*(\d{1,3}(?:[.,]\d{3})*)").unwrap());

/// Total amount from the `💰 Total: $N` line of an order payload.
pub fn parse_order_total(raw: &str) -> Option<u64> {
    let caps = ORDER_TOTAL.captures(raw)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

static PAYMENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"💳\s*Pago:\s*(\w+)").unwrap());
static PAYMENT_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*\d{1,3}(?:[.,]\d{3})*\s*\((\w+)\)").unwrap());
static PAYMENT_BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"🔹\s*(\w+):").unwrap());

/// Payment method label from the order payload, trying the summary line
/// first and two older payload layouts after it.
pub fn parse_payment_label(raw: &str) -> Option<String> {
    for pattern in [&*PAYMENT_LINE, &*PAYMENT_PARENS, &*PAYMENT_BULLET] {
        if let Some(caps) = pattern.captures(raw) {
            return Some(caps[1].to_string());
        }
    }
    None
}

static CALLBACK_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"3\d{9}").unwrap());

/// Colombian mobile number anywhere in the text.
pub fn extract_callback_number(text: &str) -> Option<String> {
    CALLBACK_NUMBER
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Classifier for "I'll send the payment in a moment" messages. The exact
/// phrase coverage is locale slang and likely incomplete, so call sites
/// depend on this seam rather than a fixed list.
pub trait PaymentIntent: Send + Sync {
    fn is_paying_shortly(&self, text: &str) -> bool;
}

/// Default classifier: fixed Colombian-Spanish phrase patterns matched
/// against accent-folded text.
pub struct PhrasePaymentIntent {
    patterns: RegexSet,
}

impl PhrasePaymentIntent {
    pub fn new() -> Self {
        let patterns = RegexSet::new([
            r"ya te (envio|mando|paso)",
            r"dame un momento",
            r"ya va",
            r"espera",
            r"ahorita",
            r"en un momento",
            r"ya mismo",
            r"ahora (te |lo )?envio",
            r"enseguida",
            r"ya lo (hago|envio|mando)",
            r"dejame",
            r"un segundo",
            r"un minuto",
        ])
        .unwrap();
        Self { patterns }
    }
}

impl Default for PhrasePaymentIntent {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentIntent for PhrasePaymentIntent {
    fn is_paying_shortly(&self, text: &str) -> bool {
        self.patterns.is_match(&normalize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_accents_and_whitespace() {
        assert_eq!(normalize("  Ya  te ENVÍO  "), "ya te envio");
        assert_eq!(normalize("Mañana"), "manana");
    }

    #[test]
    fn options_accept_digits_and_words() {
        assert_eq!(normalize_option("1"), Some(1));
        assert_eq!(normalize_option("Uno"), Some(1));
        assert_eq!(normalize_option(" cinco "), Some(5));
        assert_eq!(normalize_option("seis"), None);
        assert_eq!(normalize_option("10"), None);
    }

    #[test]
    fn menu_digit_is_strict() {
        assert!(is_menu_digit(" 3 "));
        assert!(!is_menu_digit("33"));
        assert!(!is_menu_digit("tres"));
    }

    #[test]
    fn web_order_marker_survives_accents_and_case() {
        assert!(is_web_order_payload("HOLA Cocina Casera\n🍽️ 1 almuerzo"));
        assert!(!is_web_order_payload("hola, quiero un almuerzo"));
    }

    #[test]
    fn farewells_match_whole_words_only() {
        assert!(is_farewell("gracias"));
        assert!(is_farewell("Muchas gracias!"));
        assert!(is_farewell("ok listo"));
        assert!(!is_farewell("graciasss"));
        assert!(!is_farewell("el okey del pedido"));
    }

    #[test]
    fn order_total_handles_both_separators() {
        let dotted = "💳 Pago: Nequi\n💰 Total: $13.000";
        let comma = "💰 Total: $ 13,000";
        assert_eq!(parse_order_total(dotted), Some(13000));
        assert_eq!(parse_order_total(comma), Some(13000));
        assert_eq!(parse_order_total("sin total"), None);
    }

    #[test]
    fn payment_label_tries_fallback_layouts() {
        assert_eq!(
            parse_payment_label("💳 Pago: Daviplata").as_deref(),
            Some("Daviplata")
        );
        assert_eq!(
            parse_payment_label("envía $13.000 (Nequi)").as_deref(),
            Some("Nequi")
        );
        assert_eq!(
            parse_payment_label("🔹 Bancolombia: 123-456").as_deref(),
            Some("Bancolombia")
        );
        assert_eq!(parse_payment_label("nada"), None);
    }

    #[test]
    fn callback_number_extracted_from_surrounding_text() {
        assert_eq!(
            extract_callback_number("mi numero es 3001234567 gracias").as_deref(),
            Some("3001234567")
        );
        assert_eq!(extract_callback_number("60012345"), None);
    }

    #[test]
    fn paying_shortly_phrases() {
        let intent = PhrasePaymentIntent::new();
        assert!(intent.is_paying_shortly("Ya te envío el comprobante"));
        assert!(intent.is_paying_shortly("dame un momento porfa"));
        assert!(intent.is_paying_shortly("AHORITA lo mando"));
        assert!(!intent.is_paying_shortly("aquí está el comprobante"));
    }
}
