//! Dual-strategy content extraction: structured HTML windows and plain-text
//! line windows, both run through the shared pattern set.

use std::collections::HashSet;

use chrono::NaiveDate;
use dealfeed_core::{DealCandidate, ExtractionStrategy, InboundEmail, SenderEntry};
use scraper::{ElementRef, Html, Selector};

use crate::patterns::extract_from_window;
use crate::AdapterError;

const BLOCK_TAGS: &[&str] = &["p", "div", "td", "li", "tr", "section", "article", "table"];
const PROMO_HINTS: &[&str] = &["deal", "offer", "promo", "flight"];
const CONTEXT_LINES: usize = 2;

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn containing_block<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| BLOCK_TAGS.contains(&el.value().name()))
}

fn is_promo_block(element: &ElementRef<'_>) -> bool {
    ["class", "id"]
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::to_ascii_lowercase)
        .any(|value| PROMO_HINTS.iter().any(|hint| value.contains(hint)))
}

/// Collapses candidates sharing route, price and dates; first one wins.
pub fn dedup_exact(candidates: Vec<DealCandidate>) -> Vec<DealCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| {
            seen.insert((
                c.deal_type,
                c.origin_code.clone(),
                c.destination_code.clone(),
                c.price.to_bits(),
                c.travel_start,
                c.travel_end,
            ))
        })
        .collect()
}

pub fn extract_structured(
    html: &str,
    sender: &SenderEntry,
    today: NaiveDate,
) -> Result<Vec<DealCandidate>, AdapterError> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;
    let hinted = selector("[class], [id]")?;
    let mut out = Vec::new();

    for anchor in document.select(&anchors) {
        let own = element_text(&anchor);
        let block = containing_block(&anchor)
            .map(|b| element_text(&b))
            .unwrap_or_default();
        let window = format!("{own} {block}");
        out.extend(extract_from_window(
            &window,
            sender,
            today,
            ExtractionStrategy::Structured,
            anchor.value().attr("href"),
        ));
    }

    for block in document.select(&hinted).filter(is_promo_block) {
        let href = block
            .select(&anchors)
            .next()
            .and_then(|a| a.value().attr("href"));
        out.extend(extract_from_window(
            &element_text(&block),
            sender,
            today,
            ExtractionStrategy::Structured,
            href,
        ));
    }

    Ok(dedup_exact(out))
}

pub fn extract_plain_text(text: &str, sender: &SenderEntry, today: NaiveDate) -> Vec<DealCandidate> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let lo = i.saturating_sub(CONTEXT_LINES);
        let hi = (i + CONTEXT_LINES + 1).min(lines.len());
        let window = lines[lo..hi].join("\n");
        out.extend(extract_from_window(
            &window,
            sender,
            today,
            ExtractionStrategy::PlainText,
            None,
        ));
    }
    dedup_exact(out)
}

/// Runs both strategies; structured candidates come first.
pub fn extract(
    email: &InboundEmail,
    sender: &SenderEntry,
    today: NaiveDate,
) -> Result<Vec<DealCandidate>, AdapterError> {
    let mut candidates = match email.html_body.as_deref() {
        Some(html) if !html.trim().is_empty() => extract_structured(html, sender, today)?,
        _ => Vec::new(),
    };
    if let Some(text) = email.plain_text.as_deref() {
        candidates.extend(extract_plain_text(text, sender, today));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dealfeed_core::{DealType, SenderCategory};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn agency() -> SenderEntry {
        SenderEntry::new("despegar.com", "Despegar", SenderCategory::Agency)
    }

    #[test]
    fn anchor_window_uses_block_text_and_href() {
        let html = r#"
            <html><body><table><tr>
              <td>Vuelos de Monterrey a Cancún desde $1,299 MXN 15% de descuento
                <a href="https://despegar.com/mty-cun">Reserva ya</a></td>
            </tr></table></body></html>"#;
        let out = extract_structured(html, &agency(), today()).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.origin_code.as_deref(), Some("MTY"));
        assert_eq!(c.destination_code.as_deref(), Some("CUN"));
        assert_eq!(c.price, 1299.0);
        assert_eq!(c.discount_percent, Some(15.0));
        assert_eq!(c.deal_url.as_deref(), Some("https://despegar.com/mty-cun"));
        assert_eq!(c.strategy, ExtractionStrategy::Structured);
    }

    #[test]
    fn promo_block_without_matching_anchor_text_still_extracts() {
        let html = r#"
            <div class="hero-offer">
              <h2>Crucero de Miami a Cozumel</h2>
              <span>Solo $499 por persona</span>
              <a href="https://despegar.com/cruise">Ver</a>
            </div>"#;
        let out = extract_structured(html, &agency(), today()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].deal_type, DealType::Cruise);
        assert_eq!(out[0].deal_url.as_deref(), Some("https://despegar.com/cruise"));
    }

    #[test]
    fn plain_text_windows_span_neighbouring_lines_and_collapse() {
        let text = "Hola viajero!\nDe Guadalajara a Tijuana\nPrecio: $89 por trayecto\n\nOtras noticias";
        let out = extract_plain_text(text, &agency(), today());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].origin_code.as_deref(), Some("GDL"));
        assert_eq!(out[0].destination_code.as_deref(), Some("TIJ"));
        assert_eq!(out[0].price, 89.0);
        assert_eq!(out[0].strategy, ExtractionStrategy::PlainText);
    }

    #[test]
    fn extract_merges_both_strategies() {
        let email = InboundEmail {
            message_id: "m-1".into(),
            from_address: "ofertas@despegar.com".into(),
            subject: "Ofertas".into(),
            received_at: Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).single().unwrap(),
            plain_text: Some("De Monterrey a Cancun por $205".into()),
            html_body: Some(
                r#"<p>De Monterrey a Cancun por $199 <a href="https://x.example/d">ver</a></p>"#.into(),
            ),
        };
        let out = extract(&email, &agency(), today()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].strategy, ExtractionStrategy::Structured);
        assert_eq!(out[1].strategy, ExtractionStrategy::PlainText);
    }

    #[test]
    fn empty_bodies_yield_no_candidates() {
        let email = InboundEmail {
            message_id: "m-2".into(),
            from_address: "ofertas@despegar.com".into(),
            subject: String::new(),
            received_at: Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).single().unwrap(),
            plain_text: None,
            html_body: Some("   ".into()),
        };
        assert!(extract(&email, &agency(), today()).unwrap().is_empty());
    }
}
