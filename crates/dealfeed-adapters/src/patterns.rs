//! Pure pattern functions over one text window. Both extraction strategies
//! funnel their windows through [`extract_from_window`].

use std::ops::Range;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use dealfeed_core::{DealCandidate, DealType, ExtractionStrategy, SenderCategory, SenderEntry};
use regex::{Captures, Regex};

use crate::cities::resolve_airport_code;

pub const MIN_PRICE: f64 = 20.0;
pub const MAX_PRICE: f64 = 10_000.0;
pub const MAX_EXCERPT_CHARS: usize = 280;
const MAX_CITY_WORDS: usize = 4;

const AMOUNT: &str = r"(?P<cur>\bUS\$|\bUSD[ \t]?\$?|\bMXN[ \t]?\$?|\bEUR|\bGBP|\$|€|£)[ \t]?(?P<int>\d{1,3}(?:,\d{3})+|\d+)(?:\.(?P<dec>\d{2}))?";

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid built-in pattern {pattern:?}: {err}"),
    }
}

static PRICE: LazyLock<Regex> = LazyLock::new(|| compile(&format!("(?i){AMOUNT}")));
static ORIGINAL_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)\b(?:antes|was|regular|normal)\b[ \t]*:?[ \t]*(?:de[ \t]+)?{AMOUNT}"
    ))
});

static ROUTE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(?:de|desde|from)[ \t]+(\p{L}+(?:[ \t]+\p{L}+)*?)[ \t]+(?:a|hacia|to|para)[ \t]+(\p{L}+(?:[ \t]+\p{L}+){0,3})",
    )
});
static ROUTE_BARE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(\p{L}+(?:[ \t]+\p{L}+){0,3})[ \t]*(?:\bto\b|→|->|–|-)[ \t]*(\p{L}+(?:[ \t]+\p{L}+){0,3})",
    )
});
static ROUTE_CODES: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b([A-Z]{3})[ \t]*(?:->|-|–|→|/|to)[ \t]*([A-Z]{3})\b"));

static ROUND_TRIP: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:ida y vuelta|viaje redondo|vuelo redondo|round[ -]?trip|return trip)\b")
});

static DISCOUNT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)(\d{1,3}(?:\.\d+)?)[ \t]?%[ \t]*(?:de[ \t]+descuento|descuento|de[ \t]+ahorro|ahorro|dto\b|off\b|menos\b|discount)",
    )
});
static DISCOUNT_SAVE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:ahorra|save)[ \t]+(?:hasta[ \t]+|up[ \t]+to[ \t]+)?(\d{1,3}(?:\.\d+)?)[ \t]?%")
});

static DATE_ISO: LazyLock<Regex> = LazyLock::new(|| compile(r"\b(\d{4})-(\d{2})-(\d{2})\b"));
static DATE_DMY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b"));
static DATE_ES: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(\d{1,2})[ \t]+(?:de[ \t]+)?(enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|setiembre|octubre|noviembre|diciembre|ene|feb|mar|abr|may|jun|jul|ago|sept|sep|oct|nov|dic)\b\.?(?:[ \t]+(?:de[ \t]+)?(\d{4})\b)?",
    )
});
static DATE_EN: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b\.?[ \t]+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?[ \t]+(\d{4})\b)?",
    )
});

static URL: LazyLock<Regex> = LazyLock::new(|| compile(r#"https?://[^\s<>"'()\[\]]+"#));

static CRUISE_WORDS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(?:cruceros?|cruises?|naviera)\b"));
static HOTEL_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(?:hotel(?:es|s)?|hospedaje|resorts?|noches|nights|alojamiento|todo incluido|all[ -]inclusive)\b",
    )
});

#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatch {
    pub amount: f64,
    pub currency: &'static str,
    pub span: Range<usize>,
}

fn currency_code(symbol: &str) -> &'static str {
    let symbol = symbol.trim().trim_end_matches('$').trim().to_ascii_uppercase();
    match symbol.as_str() {
        "MXN" => "MXN",
        "EUR" | "€" => "EUR",
        "GBP" | "£" => "GBP",
        _ => "USD",
    }
}

fn amount_from(caps: &Captures<'_>) -> Option<PriceMatch> {
    let whole = caps.get(0)?;
    let int: f64 = caps.name("int")?.as_str().replace(',', "").parse().ok()?;
    let cents = caps
        .name("dec")
        .and_then(|d| d.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(PriceMatch {
        amount: int + cents / 100.0,
        currency: currency_code(caps.name("cur")?.as_str()),
        span: whole.range(),
    })
}

/// First currency amount in the window that is not an "antes/was $X" figure.
pub fn extract_price(window: &str) -> Option<PriceMatch> {
    let reference_spans: Vec<Range<usize>> =
        ORIGINAL_PRICE.find_iter(window).map(|m| m.range()).collect();
    PRICE
        .captures_iter(window)
        .filter_map(|caps| amount_from(&caps))
        .find(|p| !reference_spans.iter().any(|r| r.contains(&p.span.start)))
}

pub fn extract_original_price(window: &str) -> Option<f64> {
    ORIGINAL_PRICE
        .captures(window)
        .and_then(|caps| amount_from(&caps))
        .map(|p| p.amount)
}

/// Runs `re` from every character offset so an early unresolvable match
/// does not hide a later valid one.
fn overlapping_captures<'h>(re: &'h Regex, hay: &'h str) -> impl Iterator<Item = Captures<'h>> + 'h {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start > hay.len() {
            return None;
        }
        let caps = re.captures_at(hay, start)?;
        let begin = caps.get(0)?.start();
        start = hay[begin..]
            .chars()
            .next()
            .map_or(hay.len() + 1, |c| begin + c.len_utf8());
        Some(caps)
    })
}

fn resolve_trailing_city(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let n = words.len();
    (1..=n.min(MAX_CITY_WORDS))
        .rev()
        .find_map(|k| resolve_airport_code(&words[n - k..].join(" ")))
}

fn resolve_leading_city(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    (1..=words.len().min(MAX_CITY_WORDS))
        .rev()
        .find_map(|k| resolve_airport_code(&words[..k].join(" ")))
}

fn first_route(re: &Regex, window: &str) -> Option<(String, String)> {
    overlapping_captures(re, window).find_map(|caps| {
        let origin = resolve_trailing_city(caps.get(1)?.as_str())?;
        let destination = resolve_leading_city(caps.get(2)?.as_str())?;
        (origin != destination).then_some((origin, destination))
    })
}

/// Returns `(origin, destination)` airport codes; never two equal codes.
pub fn extract_route(window: &str) -> Option<(String, String)> {
    first_route(&ROUTE_PHRASE, window)
        .or_else(|| first_route(&ROUTE_BARE, window))
        .or_else(|| first_route(&ROUTE_CODES, window))
}

pub fn is_round_trip(window: &str) -> bool {
    ROUND_TRIP.is_match(window)
}

pub fn extract_discount(window: &str) -> Option<f64> {
    let suffix = DISCOUNT_SUFFIX.captures(window);
    let save = DISCOUNT_SAVE.captures(window);
    let earliest = match (suffix, save) {
        (Some(a), Some(b)) => {
            if a.get(0)?.start() <= b.get(0)?.start() {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    earliest.get(1)?.as_str().parse().ok()
}

/// Percentage saved against a higher reference price, rounded and clamped to `[0, 90]`.
pub fn derived_discount(original: f64, price: f64) -> f64 {
    (((original - price) / original) * 100.0).round().clamp(0.0, 90.0)
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    let month = match name.get(..3)? {
        "ene" | "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" | "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" | "aug" => 8,
        "sep" | "set" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// A yearless date takes `today`'s year, or the next one when not strictly after `today`.
fn with_year(year: Option<&str>, month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y.parse().ok()?, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year > today {
                Some(this_year)
            } else {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            }
        }
    }
}

fn parse_ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn named_month_date(month: &str, day: &str, year: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    with_year(year, month_number(month)?, day.parse().ok()?, today)
}

fn start_of(caps: &Captures<'_>) -> usize {
    caps.get(0).map_or(0, |m| m.start())
}

/// Dates strictly after `today`, in window order.
pub fn extract_future_dates(window: &str, today: NaiveDate) -> Vec<NaiveDate> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();
    for caps in DATE_ISO.captures_iter(window) {
        if let Some(date) = parse_ymd(&caps[1], &caps[2], &caps[3]) {
            found.push((start_of(&caps), date));
        }
    }
    for caps in DATE_DMY.captures_iter(window) {
        if let Some(date) = parse_ymd(&caps[3], &caps[2], &caps[1]) {
            found.push((start_of(&caps), date));
        }
    }
    for caps in DATE_ES.captures_iter(window) {
        let year = caps.get(3).map(|y| y.as_str());
        if let Some(date) = named_month_date(&caps[2], &caps[1], year, today) {
            found.push((start_of(&caps), date));
        }
    }
    for caps in DATE_EN.captures_iter(window) {
        let year = caps.get(3).map(|y| y.as_str());
        if let Some(date) = named_month_date(&caps[1], &caps[2], year, today) {
            found.push((start_of(&caps), date));
        }
    }

    found.sort_by_key(|(start, _)| *start);
    found.dedup_by_key(|(start, _)| *start);
    found
        .into_iter()
        .map(|(_, date)| date)
        .filter(|date| *date > today)
        .collect()
}

pub fn is_absolute_url(candidate: &str) -> bool {
    let lower = candidate.trim().to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && lower.len() > "https://".len()
}

pub fn extract_url(window: &str) -> Option<String> {
    URL.find_iter(window)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .find(|url| is_absolute_url(url))
        .map(str::to_string)
}

pub fn classify_deal_type(category: SenderCategory, window: &str) -> DealType {
    match category {
        SenderCategory::Cruise => DealType::Cruise,
        SenderCategory::Hotel => DealType::Hotel,
        _ if CRUISE_WORDS.is_match(window) => DealType::Cruise,
        _ if HOTEL_WORDS.is_match(window) => DealType::Hotel,
        _ => DealType::Flight,
    }
}

pub fn excerpt(window: &str) -> String {
    window
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_EXCERPT_CHARS)
        .collect()
}

/// Applies the shared pattern set to one window. `None` when the window has
/// no in-bounds price or no resolvable route.
pub fn extract_from_window(
    window: &str,
    sender: &SenderEntry,
    today: NaiveDate,
    strategy: ExtractionStrategy,
    anchor_href: Option<&str>,
) -> Option<DealCandidate> {
    let price = extract_price(window)?;
    if !(MIN_PRICE..=MAX_PRICE).contains(&price.amount) {
        return None;
    }
    let (origin, destination) = extract_route(window)?;

    let original_price = extract_original_price(window).filter(|o| *o > price.amount);
    let discount_percent = extract_discount(window)
        .or_else(|| original_price.map(|o| derived_discount(o, price.amount)));
    let dates = extract_future_dates(window, today);
    let deal_url = anchor_href
        .filter(|href| is_absolute_url(href))
        .map(|href| href.trim().to_string())
        .or_else(|| extract_url(window));

    Some(DealCandidate {
        deal_type: classify_deal_type(sender.category, window),
        origin_code: Some(origin),
        destination_code: Some(destination),
        price: price.amount,
        currency: price.currency.to_string(),
        discount_percent,
        original_price,
        is_round_trip: is_round_trip(window),
        travel_start: dates.first().copied(),
        travel_end: dates.get(1).copied(),
        deal_url,
        raw_excerpt: excerpt(window),
        strategy,
    })
}
