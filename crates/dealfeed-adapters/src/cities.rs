use std::collections::HashMap;
use std::sync::LazyLock;

const CITY_CODES: &[(&str, &str)] = &[
    // Mexico
    ("ciudad de mexico", "MEX"),
    ("mexico city", "MEX"),
    ("cdmx", "MEX"),
    ("mexico", "MEX"),
    ("cancun", "CUN"),
    ("guadalajara", "GDL"),
    ("monterrey", "MTY"),
    ("tijuana", "TIJ"),
    ("puerto vallarta", "PVR"),
    ("vallarta", "PVR"),
    ("los cabos", "SJD"),
    ("san jose del cabo", "SJD"),
    ("cabo", "SJD"),
    ("merida", "MID"),
    ("oaxaca", "OAX"),
    ("huatulco", "HUX"),
    ("puerto escondido", "PXM"),
    ("acapulco", "ACA"),
    ("mazatlan", "MZT"),
    ("chihuahua", "CUU"),
    ("culiacan", "CUL"),
    ("hermosillo", "HMO"),
    ("la paz", "LAP"),
    ("leon", "BJX"),
    ("queretaro", "QRO"),
    ("puebla", "PBC"),
    ("veracruz", "VER"),
    ("villahermosa", "VSA"),
    ("tuxtla gutierrez", "TGZ"),
    ("tuxtla", "TGZ"),
    ("chetumal", "CTM"),
    ("cozumel", "CZM"),
    ("tulum", "TQO"),
    ("zihuatanejo", "ZIH"),
    ("ixtapa", "ZIH"),
    ("aguascalientes", "AGU"),
    ("san luis potosi", "SLP"),
    ("morelia", "MLM"),
    ("torreon", "TRC"),
    ("durango", "DGO"),
    ("zacatecas", "ZCL"),
    ("mexicali", "MXL"),
    ("ciudad juarez", "CJS"),
    ("reynosa", "REX"),
    ("tampico", "TAM"),
    ("campeche", "CPE"),
    // United States and Canada
    ("nueva york", "JFK"),
    ("new york", "JFK"),
    ("los angeles", "LAX"),
    ("chicago", "ORD"),
    ("miami", "MIA"),
    ("orlando", "MCO"),
    ("houston", "IAH"),
    ("dallas", "DFW"),
    ("san antonio", "SAT"),
    ("austin", "AUS"),
    ("las vegas", "LAS"),
    ("san francisco", "SFO"),
    ("san diego", "SAN"),
    ("seattle", "SEA"),
    ("denver", "DEN"),
    ("phoenix", "PHX"),
    ("atlanta", "ATL"),
    ("boston", "BOS"),
    ("washington", "IAD"),
    ("filadelfia", "PHL"),
    ("philadelphia", "PHL"),
    ("honolulu", "HNL"),
    ("toronto", "YYZ"),
    ("vancouver", "YVR"),
    ("montreal", "YUL"),
    // Latin America and Caribbean
    ("bogota", "BOG"),
    ("medellin", "MDE"),
    ("cartagena", "CTG"),
    ("lima", "LIM"),
    ("cusco", "CUZ"),
    ("santiago", "SCL"),
    ("buenos aires", "EZE"),
    ("sao paulo", "GRU"),
    ("rio de janeiro", "GIG"),
    ("panama", "PTY"),
    ("san jose", "SJO"),
    ("guatemala", "GUA"),
    ("san salvador", "SAL"),
    ("la habana", "HAV"),
    ("habana", "HAV"),
    ("havana", "HAV"),
    ("punta cana", "PUJ"),
    ("santo domingo", "SDQ"),
    ("san juan", "SJU"),
    ("quito", "UIO"),
    ("montevideo", "MVD"),
    // Europe
    ("madrid", "MAD"),
    ("barcelona", "BCN"),
    ("londres", "LHR"),
    ("london", "LHR"),
    ("paris", "CDG"),
    ("roma", "FCO"),
    ("rome", "FCO"),
    ("milan", "MXP"),
    ("amsterdam", "AMS"),
    ("frankfurt", "FRA"),
    ("munich", "MUC"),
    ("lisboa", "LIS"),
    ("lisbon", "LIS"),
    ("estambul", "IST"),
    ("istanbul", "IST"),
    ("dublin", "DUB"),
    ("zurich", "ZRH"),
    // Asia
    ("tokio", "NRT"),
    ("tokyo", "NRT"),
    ("seul", "ICN"),
    ("seoul", "ICN"),
    ("dubai", "DXB"),
];

/// Three-letter tokens that read like airport codes but never are one here.
const NOT_AIRPORT_CODES: &[&str] = &[
    "USD", "MXN", "EUR", "GBP", "OFF", "THE", "AND", "POR", "DEL", "LOS", "LAS", "CON", "SIN",
    "VIP", "FOR", "YOU", "NEW", "HOY", "MAS", "VER", "ALL",
];

static CITY_INDEX: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| CITY_CODES.iter().copied().collect());

/// Lower-cases and strips Spanish/Portuguese/French diacritics, collapsing
/// runs of whitespace to a single space.
pub fn fold_city_name(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_airport_code(token: &str) -> bool {
    token.len() == 3
        && token.bytes().all(|b| b.is_ascii_uppercase())
        && !NOT_AIRPORT_CODES.contains(&token)
}

/// Resolves a city name (any case, with or without accents) or an
/// upper-case three-letter code to an airport code.
pub fn resolve_airport_code(token: &str) -> Option<String> {
    let trimmed = token.trim();
    if is_airport_code(trimmed) {
        return Some(trimmed.to_string());
    }
    CITY_INDEX
        .get(fold_city_name(trimmed).as_str())
        .map(|code| code.to_string())
}
