//! Payment-receipt verification: OCR text in, verdict out.
//!
//! The pipeline extracts a monetary amount, a calendar date, and a payment
//! provider from noisy screenshot text, then decides between automatic
//! acceptance, a "transfer not yet finalized" prompt (amount visible but no
//! date stamped — the user screenshotted before confirming the send), and
//! manual review. A provider mismatch never blocks acceptance; it only adds
//! a warning.

mod vision;

pub use vision::VisionOcr;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// OCR collaborator. May be entirely absent (unconfigured), in which case
/// callers fall back to manual handling.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> anyhow::Result<String>;
}

/// Everything the pipeline managed to read from one receipt, plus the
/// verdict derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptExtraction {
    pub amount: Option<u64>,
    pub date: Option<NaiveDate>,
    pub bank: Option<String>,
    pub has_amount: bool,
    pub amount_matches: bool,
    pub has_date: bool,
    pub is_today: bool,
    pub bank_matches: bool,
    pub verified: bool,
    pub manual_review: bool,
    pub warnings: Vec<String>,
    pub reason: String,
}

impl ReceiptExtraction {
    /// The screenshot shows a transfer that was never confirmed: no date
    /// stamp. Distinct from generic manual review — the user is asked to
    /// complete the transfer and resend.
    pub fn transfer_not_finalized(&self) -> bool {
        !self.verified && !self.has_date
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Extraction errored or found no usable text; only manual handling is
    /// possible.
    Unreadable,
    Report(ReceiptExtraction),
}

/// Minimum characters of OCR output before we trust it enough to parse.
const MIN_TEXT_LEN: usize = 20;

/// Run the full pipeline against one image.
pub async fn verify_receipt(
    ocr: &dyn TextExtractor,
    image: &[u8],
    expected_amount: u64,
    expected_method: Option<&str>,
    today: NaiveDate,
) -> VerifyOutcome {
    let text = match ocr.extract_text(image).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "receipt OCR failed");
            return VerifyOutcome::Unreadable;
        }
    };
    if text.trim().len() < MIN_TEXT_LEN {
        tracing::warn!(len = text.len(), "receipt OCR produced too little text");
        return VerifyOutcome::Unreadable;
    }
    VerifyOutcome::Report(evaluate(&text, expected_amount, expected_method, today))
}

/// Pure verdict over already-extracted text. Identical inputs always yield
/// the identical verdict.
pub fn evaluate(
    text: &str,
    expected_amount: u64,
    expected_method: Option<&str>,
    today: NaiveDate,
) -> ReceiptExtraction {
    let amount = parse_amount(text);
    let date = parse_date(text, today);
    let bank = detect_bank(text).map(str::to_string);

    let has_amount = amount.is_some();
    let amount_matches = amount == Some(expected_amount);
    let has_date = date.is_some();
    let is_today = date == Some(today);
    let bank_matches = match (bank.as_deref(), expected_method) {
        (Some(found), Some(expected)) => {
            let found = found.to_lowercase();
            let expected = expected.to_lowercase();
            found.contains(&expected) || expected.contains(&found)
        }
        _ => false,
    };

    let verified = has_amount && amount_matches && has_date && is_today;

    let reason = if verified {
        "Comprobante verificado correctamente".to_string()
    } else {
        let mut issues = Vec::new();
        if !has_amount {
            issues.push("no se detectó monto".to_string());
        } else if !amount_matches {
            issues.push(format!(
                "monto diferente (${} vs ${})",
                amount.unwrap_or_default(),
                expected_amount
            ));
        }
        if !has_date {
            issues.push("no se detectó fecha".to_string());
        } else if !is_today {
            issues.push("fecha diferente al día de hoy".to_string());
        }
        issues.join(", ")
    };

    let mut warnings = Vec::new();
    if let (Some(expected), Some(found)) = (expected_method, bank.as_deref()) {
        if !bank_matches {
            warnings.push(format!("Método de pago: {found} (esperado: {expected})"));
        }
    }

    tracing::info!(
        amount = ?amount,
        date = ?date,
        bank = ?bank,
        verified,
        "receipt analyzed"
    );

    ReceiptExtraction {
        amount,
        date,
        bank,
        has_amount,
        amount_matches,
        has_date,
        is_today,
        bank_matches,
        verified,
        manual_review: !verified,
        warnings,
        reason,
    }
}

static AMOUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\$\s*(\d{1,3}(?:[.,]\d{3})*)").unwrap(),
        Regex::new(r"(?i)(\d{1,3}(?:[.,]\d{3})*)\s*COP").unwrap(),
        Regex::new(r"(?i)(?:valor|monto|total|transferencia).{0,40}?\$?\s*(\d{1,3}(?:[.,]\d{3})*)")
            .unwrap(),
        Regex::new(r"(?i)\$?\s*(\d{1,3}(?:[.,]\d{3})*)\s*(?:pesos|cop)").unwrap(),
    ]
});

const AMOUNT_MIN: u64 = 1_000;
const AMOUNT_MAX: u64 = 1_000_000;

/// Colombian-peso amount in the text. Thousands separators can be either
/// `.` or `,`; among several candidates the most frequently repeated token
/// wins, with ties broken toward the larger value.
pub fn parse_amount(text: &str) -> Option<u64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for pattern in AMOUNT_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
            if let Ok(value) = digits.parse::<u64>() {
                if (AMOUNT_MIN..=AMOUNT_MAX).contains(&value) {
                    *counts.entry(value).or_insert(0) += 1;
                }
            }
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(value, count)| (count, value))
        .map(|(value, _)| value)
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    Some(match prefix.as_str() {
        "ene" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" => 12,
        _ => return None,
    })
}

const MONTH_NAMES: &str =
    "enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre";

static DATE_DMY4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4})").unwrap());
static DATE_DMY2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{2})").unwrap());
static DATE_YMD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[/\-.](\d{1,2})[/\-.](\d{1,2})").unwrap());
static DATE_MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)({MONTH_NAMES})\s+(\d{{1,2}})\s+(?:de\s+)?(\d{{4}})"
    ))
    .unwrap()
});
static DATE_DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(\d{{1,2}})\s+(?:de\s+)?({MONTH_NAMES})\s+(?:de\s+)?(\d{{4}})"
    ))
    .unwrap()
});
static DATE_DAY_FIRST_ABBREV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d{1,2})\s+(?:de\s+)?(ene|feb|mar|abr|may|jun|jul|ago|sep|oct|nov|dic)[a-záéí]*\s+(?:de\s+)?(\d{4}|\d{2})",
    )
    .unwrap()
});

fn expand_year(raw: &str) -> Option<i32> {
    let value: i32 = raw.parse().ok()?;
    Some(if raw.len() == 2 { 2000 + value } else { value })
}

fn within_capture_window(date: NaiveDate, today: NaiveDate) -> bool {
    let age = (today - date).num_days();
    (0..=7).contains(&age)
}

/// Transaction date in the text: numeric D/M/Y, Y/M/D, and spelled Spanish
/// month names. Only dates between today and 7 days prior are accepted —
/// future dates and stale captures are rejected.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    for caps in DATE_DMY4.captures_iter(text).chain(DATE_DMY2.captures_iter(text)) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = expand_year(&caps[3])?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if within_capture_window(date, today) {
                return Some(date);
            }
        }
    }

    for caps in DATE_YMD.captures_iter(text) {
        let year = expand_year(&caps[1])?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if within_capture_window(date, today) {
                return Some(date);
            }
        }
    }

    for caps in DATE_MONTH_FIRST.captures_iter(text) {
        let month = month_from_name(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year = expand_year(&caps[3])?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if within_capture_window(date, today) {
                return Some(date);
            }
        }
    }

    for caps in DATE_DAY_FIRST
        .captures_iter(text)
        .chain(DATE_DAY_FIRST_ABBREV.captures_iter(text))
    {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_from_name(&caps[2])?;
        let year = expand_year(&caps[3])?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if within_capture_window(date, today) {
                return Some(date);
            }
        }
    }

    None
}

/// Known payment providers, matched case-insensitively as substrings.
pub fn detect_bank(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("nequi") {
        Some("Nequi")
    } else if lower.contains("daviplata") || lower.contains("davivienda") {
        Some("Daviplata")
    } else if lower.contains("bancolombia") {
        Some("Bancolombia")
    } else if lower.contains("banco de bogota") || lower.contains("bogotá") {
        Some("Banco de Bogotá")
    } else if lower.contains("bbva") {
        Some("BBVA")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 3).unwrap()
    }

    fn receipt_text(date_line: &str) -> String {
        format!(
            "Transferencia exitosa\nNequi\n$13.000\nPara: Cocina Casera\n{date_line}\nRef: 99213"
        )
    }

    #[test]
    fn amounts_with_dot_and_comma_separators_normalize_equally() {
        assert_eq!(parse_amount("Total $13.000 enviado"), Some(13_000));
        assert_eq!(parse_amount("Total $13,000 enviado"), Some(13_000));
    }

    #[test]
    fn amount_prefers_most_repeated_token() {
        let text = "valor $13.000\ntransferencia de 13.000 COP\nref 45.000";
        assert_eq!(parse_amount(text), Some(13_000));
    }

    #[test]
    fn amount_tie_breaks_toward_larger() {
        let text = "$13.000 y también $45.000";
        assert_eq!(parse_amount(text), Some(45_000));
    }

    #[test]
    fn amount_outside_range_rejected() {
        assert_eq!(parse_amount("$500 o $2,000,000"), None);
        assert_eq!(parse_amount("nada numerico"), None);
    }

    #[test]
    fn date_numeric_formats() {
        assert_eq!(parse_date("03/12/2025", today()), Some(today()));
        assert_eq!(parse_date("03-12-25", today()), Some(today()));
        assert_eq!(parse_date("2025.12.03", today()), Some(today()));
    }

    #[test]
    fn date_spanish_month_names() {
        assert_eq!(parse_date("Diciembre 03 de 2025", today()), Some(today()));
        assert_eq!(parse_date("3 de diciembre de 2025", today()), Some(today()));
        assert_eq!(parse_date("03 dic 2025", today()), Some(today()));
    }

    #[test]
    fn date_rejects_future_and_stale() {
        assert_eq!(parse_date("04/12/2025", today()), None);
        assert_eq!(parse_date("20/11/2025", today()), None);
        // Seven days back is still acceptable.
        assert_eq!(
            parse_date("26/11/2025", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
    }

    #[test]
    fn bank_detection_substring_matches() {
        assert_eq!(detect_bank("Enviado desde NEQUI"), Some("Nequi"));
        assert_eq!(detect_bank("App Davivienda"), Some("Daviplata"));
        assert_eq!(detect_bank("sin marca"), None);
    }

    #[test]
    fn verified_when_amount_and_todays_date_match() {
        let text = receipt_text("03/12/2025");
        let report = evaluate(&text, 13_000, Some("Nequi"), today());
        assert!(report.verified);
        assert!(report.warnings.is_empty());
        assert!(!report.manual_review);
    }

    #[test]
    fn provider_mismatch_is_warning_not_failure() {
        let text = receipt_text("03/12/2025").replace("Nequi", "Bancolombia");
        let report = evaluate(&text, 13_000, Some("Nequi"), today());
        assert!(report.verified);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Bancolombia"));
    }

    #[test]
    fn missing_date_is_the_not_finalized_outcome() {
        let text = receipt_text("sin fecha visible");
        let report = evaluate(&text, 13_000, Some("Nequi"), today());
        assert!(!report.verified);
        assert!(report.manual_review);
        assert!(report.transfer_not_finalized());
        assert!(report.reason.contains("no se detectó fecha"));
    }

    #[test]
    fn wrong_amount_goes_to_manual_review_with_diagnostic() {
        let text = receipt_text("03/12/2025");
        let report = evaluate(&text, 15_000, Some("Nequi"), today());
        assert!(!report.verified);
        assert!(report.manual_review);
        assert!(!report.transfer_not_finalized());
        assert!(report.reason.contains("monto diferente"));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let text = receipt_text("03/12/2025");
        let first = evaluate(&text, 13_000, Some("Nequi"), today());
        let second = evaluate(&text, 13_000, Some("Nequi"), today());
        assert_eq!(first, second);
    }

    struct FixedExtractor(String);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract_text(&self, _image: &[u8]) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl TextExtractor for FailingExtractor {
        async fn extract_text(&self, _image: &[u8]) -> anyhow::Result<String> {
            anyhow::bail!("ocr backend down")
        }
    }

    #[tokio::test]
    async fn pipeline_reports_over_fixed_extractor() {
        let ocr = FixedExtractor(receipt_text("03/12/2025"));
        let outcome = verify_receipt(&ocr, b"img", 13_000, Some("Nequi"), today()).await;
        match outcome {
            VerifyOutcome::Report(report) => assert!(report.verified),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pipeline_degrades_on_extractor_failure_or_blank_text() {
        let failing = FailingExtractor;
        assert_eq!(
            verify_receipt(&failing, b"img", 13_000, None, today()).await,
            VerifyOutcome::Unreadable
        );

        let blank = FixedExtractor("  x  ".to_string());
        assert_eq!(
            verify_receipt(&blank, b"img", 13_000, None, today()).await,
            VerifyOutcome::Unreadable
        );
    }
}
