//! Static directory of known travel senders and address-to-sender resolution.

use std::path::Path;

use anyhow::{Context, Result};
use dealfeed_core::{SenderCategory, SenderEntry};
use serde::Deserialize;

use SenderCategory::*;

const BUILTIN_SENDERS: &[(&str, &str, SenderCategory)] = &[
    // airlines
    ("vivaaerobus.com", "Viva Aerobus", Airline),
    ("volaris.com", "Volaris", Airline),
    ("aeromexico.com", "Aeroméxico", Airline),
    ("united.com", "United Airlines", Airline),
    ("delta.com", "Delta Air Lines", Airline),
    ("americanairlines.com", "American Airlines", Airline),
    ("southwest.com", "Southwest Airlines", Airline),
    ("jetblue.com", "JetBlue", Airline),
    ("alaskaair.com", "Alaska Airlines", Airline),
    ("spirit.com", "Spirit Airlines", Airline),
    ("aircanada.com", "Air Canada", Airline),
    ("westjet.com", "WestJet", Airline),
    ("avianca.com", "Avianca", Airline),
    ("copaair.com", "Copa Airlines", Airline),
    ("latam.com", "LATAM", Airline),
    ("iberia.com", "Iberia", Airline),
    ("lufthansa.com", "Lufthansa", Airline),
    ("airfrance.com", "Air France", Airline),
    ("britishairways.com", "British Airways", Airline),
    // agencies and deal newsletters
    ("expedia.com", "Expedia", Agency),
    ("despegar.com", "Despegar", Agency),
    ("bestday.com", "Best Day", Agency),
    ("travelzoo.com", "Travelzoo", Agency),
    ("priceline.com", "Priceline", Agency),
    ("going.com", "Going", Aggregator),
    ("scottscheapflights.com", "Scott's Cheap Flights", Aggregator),
    ("thriftytraveler.com", "Thrifty Traveler", Aggregator),
    ("secretflying.com", "Secret Flying", Aggregator),
    ("kayak.com", "Kayak", Aggregator),
    ("skyscanner.net", "Skyscanner", Aggregator),
    ("momondo.com", "Momondo", Aggregator),
    ("hopper.com", "Hopper", Aggregator),
    ("trivago.com", "Trivago", Aggregator),
    ("booking.com", "Booking.com", Aggregator),
    // hotels
    ("hilton.com", "Hilton", Hotel),
    ("marriott.com", "Marriott", Hotel),
    ("ihg.com", "IHG Hotels", Hotel),
    ("hyatt.com", "Hyatt", Hotel),
    ("accor.com", "Accor", Hotel),
    ("cityexpress.com", "City Express", Hotel),
    ("posadas.com", "Grupo Posadas", Hotel),
    // cruises
    ("royalcaribbean.com", "Royal Caribbean", Cruise),
    ("carnival.com", "Carnival Cruise Line", Cruise),
    ("ncl.com", "Norwegian Cruise Line", Cruise),
    ("msccruises.com", "MSC Cruises", Cruise),
    ("princess.com", "Princess Cruises", Cruise),
    // ground, loyalty, extras
    ("hertz.com", "Hertz", Car),
    ("avis.com", "Avis", Car),
    ("clubpremier.com", "Club Premier", Loyalty),
    ("points.com", "Points", Loyalty),
    ("viator.com", "Viator", Activity),
    ("getyourguide.com", "GetYourGuide", Activity),
    ("assistcard.com", "Assist Card", Insurance),
    ("worldnomads.com", "World Nomads", Insurance),
    ("amtrak.com", "Amtrak", Train),
    ("renfe.com", "Renfe", Train),
    ("ado.com.mx", "ADO", Bus),
    ("flixbus.com", "FlixBus", Bus),
    ("greyhound.com", "Greyhound", Bus),
];

/// Tie-break when an address contains more than one directory domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Directory order decides; the first matching entry wins.
    #[default]
    FirstInOrder,
    /// The longest matching domain wins; directory order breaks equal lengths.
    LongestDomain,
}

impl MatchPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first" | "first-in-order" => Some(MatchPolicy::FirstInOrder),
            "longest" | "longest-domain" => Some(MatchPolicy::LongestDomain),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendersFile {
    senders: Vec<SenderEntry>,
}

#[derive(Debug, Clone)]
pub struct SenderDirectory {
    entries: Vec<SenderEntry>,
    policy: MatchPolicy,
}

impl Default for SenderDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SenderDirectory {
    pub fn new(entries: Vec<SenderEntry>, policy: MatchPolicy) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| !e.domain.trim().is_empty())
            .map(|e| SenderEntry {
                domain: e.domain.trim().to_ascii_lowercase(),
                ..e
            })
            .collect();
        Self { entries, policy }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_SENDERS
                .iter()
                .map(|(domain, name, category)| SenderEntry::new(domain, name, *category))
                .collect(),
            MatchPolicy::default(),
        )
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let parsed: SendersFile = serde_yaml::from_str(text).context("parsing senders yaml")?;
        Ok(Self::new(parsed.senders, MatchPolicy::default()))
    }

    pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn entries(&self) -> &[SenderEntry] {
        &self.entries
    }

    /// Case-insensitive substring match of `from_address` against each domain.
    pub fn identify(&self, from_address: &str) -> Option<&SenderEntry> {
        let address = from_address.trim().to_ascii_lowercase();
        if address.is_empty() {
            return None;
        }
        let mut matches = self.entries.iter().filter(|e| address.contains(&e.domain));
        match self.policy {
            MatchPolicy::FirstInOrder => matches.next(),
            MatchPolicy::LongestDomain => matches.fold(None, |best: Option<&SenderEntry>, e| match best {
                Some(b) if b.domain.len() >= e.domain.len() => Some(b),
                _ => Some(e),
            }),
        }
    }
}
