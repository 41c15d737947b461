//! Static vocabularies mapping raw provider text onto canonical labels.
//!
//! Every lookup is an exact match after trimming (and lower-casing for the
//! free-text tables). Unmapped sector and gas labels come back as `None`;
//! callers drop those records from the derived view instead of defaulting.

use std::borrow::Cow;

use crate::{Continent, Gas, Sector};

/// Continent for an ISO 3166-1 alpha-3 code. Unmapped codes are `Unknown`.
pub fn continent_for_iso(iso: &str) -> Continent {
    let iso = iso.trim().to_ascii_uppercase();
    match iso.as_str() {
        "USA" | "CAN" | "MEX" | "GTM" | "CUB" | "HTI" | "DOM" | "HND" | "NIC" | "SLV" | "CRI"
        | "PAN" | "JAM" | "TTO" | "BHS" | "BLZ" | "BRB" | "GRD" | "ATG" | "DMA" | "KNA" | "LCA"
        | "VCT" | "GRL" | "PRI" | "ABW" | "CUW" | "BMU" | "CYM" | "TCA" | "VGB" | "MSR" | "AIA"
        | "SXM" | "SPM" => Continent::NorthAmerica,

        "BRA" | "ARG" | "COL" | "PER" | "VEN" | "CHL" | "ECU" | "BOL" | "PRY" | "URY" | "GUY"
        | "SUR" | "FLK" => Continent::SouthAmerica,

        "DEU" | "GBR" | "FRA" | "ITA" | "ESP" | "POL" | "ROU" | "NLD" | "BEL" | "CZE" | "GRC"
        | "PRT" | "SWE" | "HUN" | "AUT" | "CHE" | "BGR" | "DNK" | "FIN" | "SVK" | "NOR" | "IRL"
        | "HRV" | "LTU" | "SVN" | "LVA" | "EST" | "CYP" | "LUX" | "MLT" | "ISL" | "ALB" | "MKD"
        | "SRB" | "MNE" | "BIH" | "UKR" | "BLR" | "MDA" | "RUS" | "TUR" | "AND" | "LIE" | "MCO"
        | "SMR" | "FRO" | "XKX" => Continent::Europe,

        "CHN" | "IND" | "JPN" | "KOR" | "IDN" | "PAK" | "BGD" | "VNM" | "PHL" | "THA" | "MMR"
        | "MYS" | "NPL" | "AFG" | "IRQ" | "SAU" | "YEM" | "SYR" | "JOR" | "ARE" | "ISR" | "LBN"
        | "KWT" | "QAT" | "BHR" | "OMN" | "IRN" | "KAZ" | "UZB" | "TKM" | "KGZ" | "TJK" | "MNG"
        | "PRK" | "LAO" | "KHM" | "SGP" | "BRN" | "TWN" | "HKG" | "LKA" | "BTN" | "MDV" | "AZE"
        | "GEO" | "ARM" | "TLS" | "PSE" | "MAC" => Continent::Asia,

        "NGA" | "ETH" | "EGY" | "COD" | "TZA" | "ZAF" | "KEN" | "UGA" | "DZA" | "SDN" | "MAR"
        | "AGO" | "MOZ" | "GHA" | "MDG" | "CMR" | "CIV" | "NER" | "BFA" | "MLI" | "MWI" | "ZMB"
        | "SEN" | "TCD" | "SOM" | "ZWE" | "GIN" | "RWA" | "BEN" | "BDI" | "TUN" | "SSD" | "TGO"
        | "SLE" | "LBY" | "COG" | "LBR" | "CAF" | "MRT" | "ERI" | "NAM" | "GMB" | "BWA" | "GAB"
        | "LSO" | "GNB" | "GNQ" | "MUS" | "SWZ" | "DJI" | "COM" | "CPV" | "STP" | "SYC" | "ESH"
        | "SHN" => Continent::Africa,

        "AUS" | "NZL" | "PNG" | "FJI" | "SLB" | "VUT" | "NCL" | "PYF" | "WSM" | "GUM" | "KIR"
        | "TON" | "FSM" | "PLW" | "MHL" | "NRU" | "TUV" | "COK" | "NIU" | "WLF" => {
            Continent::Oceania
        }

        _ => Continent::Unknown,
    }
}

/// Country name for an ISO 3166-1 alpha-3 code, spelled the way
/// [`standardize_country_name`] spells it. Used for rows that carry only a
/// code where the name should be.
pub fn country_name_for_iso(iso: &str) -> Option<&'static str> {
    let iso = iso.trim().to_ascii_uppercase();
    let name = match iso.as_str() {
        // North America
        "USA" => "United States",
        "CAN" => "Canada",
        "MEX" => "Mexico",
        "GTM" => "Guatemala",
        "CUB" => "Cuba",
        "HTI" => "Haiti",
        "DOM" => "Dominican Republic",
        "HND" => "Honduras",
        "NIC" => "Nicaragua",
        "SLV" => "El Salvador",
        "CRI" => "Costa Rica",
        "PAN" => "Panama",
        "JAM" => "Jamaica",
        "TTO" => "Trinidad and Tobago",
        "BHS" => "Bahamas",
        "BLZ" => "Belize",
        "BRB" => "Barbados",
        "GRD" => "Grenada",
        "ATG" => "Antigua and Barbuda",
        "DMA" => "Dominica",
        "KNA" => "Saint Kitts and Nevis",
        "LCA" => "Saint Lucia",
        "VCT" => "Saint Vincent and the Grenadines",
        "GRL" => "Greenland",
        "PRI" => "Puerto Rico",
        "ABW" => "Aruba",
        "CUW" => "Curacao",
        "BMU" => "Bermuda",
        "CYM" => "Cayman Islands",
        "TCA" => "Turks and Caicos Islands",
        "VGB" => "British Virgin Islands",
        "MSR" => "Montserrat",
        "AIA" => "Anguilla",
        "SXM" => "Sint Maarten (Dutch part)",
        "SPM" => "Saint Pierre and Miquelon",

        // South America
        "BRA" => "Brazil",
        "ARG" => "Argentina",
        "COL" => "Colombia",
        "PER" => "Peru",
        "VEN" => "Venezuela, Bolivarian Republic of",
        "CHL" => "Chile",
        "ECU" => "Ecuador",
        "BOL" => "Bolivia, Plurinational State of",
        "PRY" => "Paraguay",
        "URY" => "Uruguay",
        "GUY" => "Guyana",
        "SUR" => "Suriname",
        "FLK" => "Falkland Islands",

        // Europe
        "DEU" => "Germany",
        "GBR" => "United Kingdom",
        "FRA" => "France",
        "ITA" => "Italy",
        "ESP" => "Spain",
        "POL" => "Poland",
        "ROU" => "Romania",
        "NLD" => "Netherlands",
        "BEL" => "Belgium",
        "CZE" => "Czechia",
        "GRC" => "Greece",
        "PRT" => "Portugal",
        "SWE" => "Sweden",
        "HUN" => "Hungary",
        "AUT" => "Austria",
        "CHE" => "Switzerland",
        "BGR" => "Bulgaria",
        "DNK" => "Denmark",
        "FIN" => "Finland",
        "SVK" => "Slovakia",
        "NOR" => "Norway",
        "IRL" => "Ireland",
        "HRV" => "Croatia",
        "LTU" => "Lithuania",
        "SVN" => "Slovenia",
        "LVA" => "Latvia",
        "EST" => "Estonia",
        "CYP" => "Cyprus",
        "LUX" => "Luxembourg",
        "MLT" => "Malta",
        "ISL" => "Iceland",
        "ALB" => "Albania",
        "MKD" => "North Macedonia",
        "SRB" => "Serbia",
        "MNE" => "Montenegro",
        "BIH" => "Bosnia and Herzegovina",
        "UKR" => "Ukraine",
        "BLR" => "Belarus",
        "MDA" => "Moldova",
        "RUS" => "Russian Federation",
        "TUR" => "Turkey",
        "AND" => "Andorra",
        "LIE" => "Liechtenstein",
        "MCO" => "Monaco",
        "SMR" => "San Marino",
        "FRO" => "Faroe Islands",
        "XKX" => "Kosovo",

        // Asia
        "CHN" => "China",
        "IND" => "India",
        "JPN" => "Japan",
        "KOR" => "Korea, Republic of",
        "IDN" => "Indonesia",
        "PAK" => "Pakistan",
        "BGD" => "Bangladesh",
        "VNM" => "Viet Nam",
        "PHL" => "Philippines",
        "THA" => "Thailand",
        "MMR" => "Myanmar",
        "MYS" => "Malaysia",
        "NPL" => "Nepal",
        "AFG" => "Afghanistan",
        "IRQ" => "Iraq",
        "SAU" => "Saudi Arabia",
        "YEM" => "Yemen",
        "SYR" => "Syrian Arab Republic",
        "JOR" => "Jordan",
        "ARE" => "United Arab Emirates",
        "ISR" => "Israel",
        "LBN" => "Lebanon",
        "KWT" => "Kuwait",
        "QAT" => "Qatar",
        "BHR" => "Bahrain",
        "OMN" => "Oman",
        "IRN" => "Iran, Islamic Republic of",
        "KAZ" => "Kazakhstan",
        "UZB" => "Uzbekistan",
        "TKM" => "Turkmenistan",
        "KGZ" => "Kyrgyzstan",
        "TJK" => "Tajikistan",
        "MNG" => "Mongolia",
        "PRK" => "Korea, Democratic People's Republic of",
        "LAO" => "Laos",
        "KHM" => "Cambodia",
        "SGP" => "Singapore",
        "BRN" => "Brunei",
        "TWN" => "Taiwan, Province of China",
        "HKG" => "Hong Kong",
        "LKA" => "Sri Lanka",
        "BTN" => "Bhutan",
        "MDV" => "Maldives",
        "AZE" => "Azerbaijan",
        "GEO" => "Georgia",
        "ARM" => "Armenia",
        "TLS" => "East Timor",
        "PSE" => "Palestine",
        "MAC" => "Macao",

        // Africa
        "NGA" => "Nigeria",
        "ETH" => "Ethiopia",
        "EGY" => "Egypt",
        "COD" => "Congo, Democratic Republic of the",
        "TZA" => "Tanzania, United Republic of",
        "ZAF" => "South Africa",
        "KEN" => "Kenya",
        "UGA" => "Uganda",
        "DZA" => "Algeria",
        "SDN" => "Sudan",
        "MAR" => "Morocco",
        "AGO" => "Angola",
        "MOZ" => "Mozambique",
        "GHA" => "Ghana",
        "MDG" => "Madagascar",
        "CMR" => "Cameroon",
        "CIV" => "Cote d'Ivoire",
        "NER" => "Niger",
        "BFA" => "Burkina Faso",
        "MLI" => "Mali",
        "MWI" => "Malawi",
        "ZMB" => "Zambia",
        "SEN" => "Senegal",
        "TCD" => "Chad",
        "SOM" => "Somalia",
        "ZWE" => "Zimbabwe",
        "GIN" => "Guinea",
        "RWA" => "Rwanda",
        "BEN" => "Benin",
        "BDI" => "Burundi",
        "TUN" => "Tunisia",
        "SSD" => "South Sudan",
        "TGO" => "Togo",
        "SLE" => "Sierra Leone",
        "LBY" => "Libya",
        "COG" => "Congo",
        "LBR" => "Liberia",
        "CAF" => "Central African Republic",
        "MRT" => "Mauritania",
        "ERI" => "Eritrea",
        "NAM" => "Namibia",
        "GMB" => "Gambia",
        "BWA" => "Botswana",
        "GAB" => "Gabon",
        "LSO" => "Lesotho",
        "GNB" => "Guinea-Bissau",
        "GNQ" => "Equatorial Guinea",
        "MUS" => "Mauritius",
        "SWZ" => "Eswatini",
        "DJI" => "Djibouti",
        "COM" => "Comoros",
        "CPV" => "Cape Verde",
        "STP" => "Sao Tome and Principe",
        "SYC" => "Seychelles",
        "ESH" => "Western Sahara",
        "SHN" => "Saint Helena",

        // Oceania
        "AUS" => "Australia",
        "NZL" => "New Zealand",
        "PNG" => "Papua New Guinea",
        "FJI" => "Fiji",
        "SLB" => "Solomon Islands",
        "VUT" => "Vanuatu",
        "NCL" => "New Caledonia",
        "PYF" => "French Polynesia",
        "WSM" => "Samoa",
        "GUM" => "Guam",
        "KIR" => "Kiribati",
        "TON" => "Tonga",
        "FSM" => "Micronesia (country)",
        "PLW" => "Palau",
        "MHL" => "Marshall Islands",
        "NRU" => "Nauru",
        "TUV" => "Tuvalu",
        "COK" => "Cook Islands",
        "NIU" => "Niue",
        "WLF" => "Wallis and Futuna",

        _ => return None,
    };
    Some(name)
}

/// Canonical sector for a free-text provider label.
pub fn sector_from_label(label: &str) -> Option<Sector> {
    let label = label.trim().to_lowercase();
    let sector = match label.as_str() {
        "energy" | "power" | "electricity" | "electricity/heat" | "fuel combustion"
        | "energy industries" => Sector::Energy,

        "transport" | "transportation" | "road transport" | "aviation" | "shipping"
        | "domestic aviation" | "international aviation" => Sector::Transport,

        "industry" | "industrial processes" | "manufacturing" | "cement" | "steel"
        | "chemicals" => Sector::Industry,

        "agriculture" | "agricultural" | "livestock" | "crops" | "manure" => {
            Sector::Agriculture
        }

        "buildings" | "residential" | "commercial" | "residential/commercial" => {
            Sector::Buildings
        }

        "waste" | "solid waste" | "wastewater" => Sector::Waste,

        "land use" | "land-use change" | "forestry" | "lulucf"
        | "land use change and forestry" => Sector::LandUse,

        _ => return None,
    };
    Some(sector)
}

/// Canonical gas for a free-text provider label.
pub fn gas_from_label(label: &str) -> Option<Gas> {
    let label = label.trim().to_lowercase();
    let gas = match label.as_str() {
        "co2" | "carbon dioxide" | "carbon_dioxide" => Gas::Co2,
        "ch4" | "methane" => Gas::Ch4,
        "n2o" | "nitrous oxide" | "nitrous_oxide" => Gas::N2o,
        "ghg" | "total ghg" | "total_ghg" | "greenhouse gas" | "all ghg" | "ghg total" => {
            Gas::GhgTotal
        }
        "f-gas" | "f-gases" | "hfc" | "pfc" | "sf6" => Gas::FGases,
        _ => return None,
    };
    Some(gas)
}

/// Collapses spelling variants of the same country onto one name so that
/// rows from different providers share a (country, year) key.
pub fn standardize_country_name(name: &str) -> Cow<'_, str> {
    let name = name.trim();
    let canonical = match name {
        "United States of America" | "USA" | "US" => "United States",
        "UK" | "Great Britain" | "United Kingdom of Great Britain and Northern Ireland" => {
            "United Kingdom"
        }
        "Russia" => "Russian Federation",
        "South Korea" | "Korea, Rep." | "Republic of Korea" => "Korea, Republic of",
        "North Korea" => "Korea, Democratic People's Republic of",
        "Taiwan" => "Taiwan, Province of China",
        "Vietnam" => "Viet Nam",
        "Iran" => "Iran, Islamic Republic of",
        "Syria" => "Syrian Arab Republic",
        "Venezuela" => "Venezuela, Bolivarian Republic of",
        "Bolivia" => "Bolivia, Plurinational State of",
        "Tanzania" => "Tanzania, United Republic of",
        "Democratic Republic of Congo" | "Democratic Republic of the Congo" | "Congo DR" | "DRC" => {
            "Congo, Democratic Republic of the"
        }
        _ => return Cow::Borrowed(name),
    };
    Cow::Borrowed(canonical)
}

/// True for rows that aggregate several countries (World, continents, income
/// groups, trade blocs). Such rows would double count per-country totals.
pub fn is_aggregate_label(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return true;
    }
    let exact = matches!(
        lower.as_str(),
        "world"
            | "africa"
            | "asia"
            | "europe"
            | "oceania"
            | "north america"
            | "south america"
            | "central america"
            | "antarctica"
            | "european union"
            | "european union (27)"
            | "european union (28)"
            | "eu-27"
            | "eu-28"
            | "eu27"
            | "eu28"
            | "oecd"
            | "non-oecd"
            | "international transport"
            | "international aviation"
            | "international shipping"
            | "kuwaiti oil fires"
            | "least developed countries"
            | "annex i"
            | "non-annex i"
    );
    exact
        || lower.contains("income")
        || lower.contains("(excl.")
        || lower.contains("(gcp)")
        || lower.starts_with("oecd ")
        || lower.starts_with("non-oecd ")
        || lower.ends_with(" (ember)")
        || lower.ends_with(" (27)")
}

/// Upper-cased ISO alpha-3 code, or `None` when the value is not exactly
/// three ASCII letters (provider aggregates use longer pseudo codes).
pub fn normalize_iso(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}
