//! Restaurant rows into Firestore documents.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::hours::process_hours;
use super::sheet::SheetRow;
use super::tags::{collect_display_tags, collect_tags, is_placeholder, specialite_display, TagGroup};
use crate::firestore::Fields;

const INSTAGRAM_VIDEO_COLUMNS: [&str; 4] = [
    "Lien vidéo insta",
    "Lien video insta",
    "Lien vidéo instagram",
    "Lien video instagram",
];

/// Trims and folds the unusual spaces and dashes found in pasted text.
pub fn clean_text(value: &str) -> String {
    value
        .trim()
        .replace(['\u{202f}', '\u{2009}', '\u{00a0}'], " ")
        .replace(['\u{2013}', '\u{2014}'], "-")
        .trim()
        .to_string()
}

fn id_invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("valid id regex"))
}

/// `Chez Nous!` → `CHEZ-NOUS`.
pub fn normalize_id_from_tag(tag: &str) -> String {
    id_invalid_chars()
        .replace_all(tag, "-")
        .trim_matches('-')
        .to_uppercase()
}

/// Items of a `['a', 'b']` style list, or `None` when `value` is not bracketed.
pub fn parse_bracketed_list(value: &str) -> Option<Vec<String>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '\'' | '"' => {
                chars.next();
                let mut item = String::new();
                for next in chars.by_ref() {
                    if next == c {
                        break;
                    }
                    item.push(next);
                }
                items.push(item);
            }
            ',' | ' ' => {
                chars.next();
            }
            _ => {
                let mut item = String::new();
                while let Some(&next) = chars.peek() {
                    if next == ',' {
                        break;
                    }
                    item.push(next);
                    chars.next();
                }
                items.push(item);
            }
        }
    }
    Some(
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Splits on `,` `/` `;` `|` `·`, or reads a bracketed list.
pub fn to_list(value: &str) -> Vec<String> {
    let value = clean_text(value);
    if value.is_empty() {
        return Vec::new();
    }
    if let Some(items) = parse_bracketed_list(&value) {
        return items;
    }
    value
        .split([',', '/', ';', '|', '·'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma separated tags with placeholders dropped.
pub fn string_to_tag_list(value: &str) -> Vec<String> {
    let value = clean_text(value);
    if is_placeholder(&value) {
        return Vec::new();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !is_placeholder(t))
        .map(str::to_string)
        .collect()
}

/// `11` → `75011`; five digits are kept; anything else is returned cleaned.
pub fn arrondissement_to_postal_code(value: &str) -> String {
    let value = clean_text(value);
    if value.len() == 5 && value.chars().all(|c| c.is_ascii_digit()) {
        return value;
    }
    match value.parse::<u32>() {
        Ok(n) if (1..=20).contains(&n) => format!("750{:02}", n),
        _ => value,
    }
}

/// One postal code per address; never empty.
pub fn parse_arrondissements(value: &str) -> Vec<String> {
    let codes: Vec<String> = clean_text(value)
        .split(['|', ',', '.'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(arrondissement_to_postal_code)
        .collect();
    if codes.is_empty() {
        vec![String::new()]
    } else {
        codes
    }
}

/// `|` separated addresses; never empty.
pub fn parse_multi_addresses(value: &str) -> Vec<String> {
    let addresses: Vec<String> = value
        .split('|')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    if addresses.is_empty() {
        vec![String::new()]
    } else {
        addresses
    }
}

fn parse_coordinate(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.replace(',', ".").parse().ok()
}

/// `;` separated coordinate pairs; decimal commas accepted.
pub fn parse_multi_coords(lat: &str, lon: &str) -> Vec<(Option<f64>, Option<f64>)> {
    let lats: Vec<&str> = if lat.is_empty() { Vec::new() } else { lat.split(';').collect() };
    let lons: Vec<&str> = if lon.is_empty() { Vec::new() } else { lon.split(';').collect() };
    (0..lats.len().max(lons.len()))
        .map(|i| {
            (
                lats.get(i).and_then(|s| parse_coordinate(s)),
                lons.get(i).and_then(|s| parse_coordinate(s)),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetroStation {
    pub station: String,
    pub lines: Vec<String>,
}

fn metro_station(station: &str, lines: &str) -> Option<MetroStation> {
    let station = station.trim();
    if is_placeholder(station) {
        return None;
    }
    Some(MetroStation {
        station: station.to_string(),
        lines: lines
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Stations for each address. Multi-address rows separate the per-address
/// values of each metro column with `|`.
pub fn metro_stations_per_address(row: &SheetRow, address_count: usize) -> Vec<Vec<MetroStation>> {
    let columns = [
        (row.text("Station de metro 1").trim(), row.text("Lignes 1").trim()),
        (row.text("Stations de metro 2 ").trim(), row.text("Lignes 2 ").trim()),
    ];
    if address_count <= 1 {
        let single = columns
            .iter()
            .filter_map(|(station, lines)| metro_station(station, lines))
            .collect();
        return vec![single];
    }
    let split = |s: &str| -> Vec<String> {
        if s.is_empty() {
            Vec::new()
        } else {
            s.split('|').map(|p| p.trim().to_string()).collect()
        }
    };
    let columns: Vec<(Vec<String>, Vec<String>)> = columns
        .iter()
        .map(|(station, lines)| (split(station), split(lines)))
        .collect();
    (0..address_count)
        .map(|i| {
            columns
                .iter()
                .filter_map(|(stations, lines)| {
                    let station = stations.get(i).map(String::as_str).unwrap_or("");
                    let lines = lines.get(i).map(String::as_str).unwrap_or("");
                    metro_station(station, lines)
                })
                .collect()
        })
        .collect()
}

/// Object literals are split so each `json!` stays small.
fn extend_fields(fields: &mut Fields, part: Value) {
    if let Value::Object(map) = part {
        fields.extend(map);
    }
}

/// A converted row, keyed by the id derived from its `Ref`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestaurantRecord {
    pub id: String,
    pub line: usize,
    pub fields: Fields,
}

impl RestaurantRecord {
    pub fn name(&self) -> &str {
        self.str_field("name")
    }

    pub fn tag(&self) -> &str {
        self.str_field("tag")
    }

    pub fn address(&self) -> &str {
        self.str_field("address")
    }

    fn str_field(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        (
            self.fields.get("latitude").and_then(Value::as_f64),
            self.fields.get("longitude").and_then(Value::as_f64),
        )
    }

    pub fn has_coordinates(&self) -> bool {
        matches!(self.coordinates(), (Some(_), Some(_)))
    }

    /// Fills whichever of latitude/longitude is missing, on the record and
    /// on its first address.
    pub fn fill_coordinates(&mut self, lat: f64, lon: f64) {
        let (current_lat, current_lon) = self.coordinates();
        let lat = current_lat.unwrap_or(lat);
        let lon = current_lon.unwrap_or(lon);
        self.fields.insert("latitude".to_string(), json!(lat));
        self.fields.insert("longitude".to_string(), json!(lon));
        if let Some(first) = self
            .fields
            .get_mut("addresses")
            .and_then(Value::as_array_mut)
            .and_then(|a| a.first_mut())
            .and_then(Value::as_object_mut)
        {
            first.insert("latitude".to_string(), json!(lat));
            first.insert("longitude".to_string(), json!(lon));
        }
    }

    /// Renames the record, used when duplicate ids are de-duplicated.
    pub fn set_id(&mut self, id: String) {
        self.fields.insert("id".to_string(), Value::String(id.clone()));
        self.id = id;
    }
}

fn optional_f64(value: Option<f64>) -> Value {
    value.map_or(Value::Null, |v| json!(v))
}

/// Converts one row. Returns `None` when the row has no `Ref` (or `tag`).
pub fn row_to_document(row: &SheetRow) -> Option<RestaurantRecord> {
    let tag = clean_text(row.first(&["Ref", "tag"]));
    let id = normalize_id_from_tag(&tag);
    if id.is_empty() {
        return None;
    }

    let name = clean_text(row.first(&["Vrai Nom", "Nom de base"]));
    let raw_name = clean_text(row.text("Nom de base"));
    let addresses = parse_multi_addresses(&clean_text(row.text("Adresse")));
    let arrondissements = parse_arrondissements(row.text("Arrondissement"));
    let coords = parse_multi_coords(
        &clean_text(row.first(&["Latitude", "latitude"])),
        &clean_text(row.first(&["Longitude", "longitude"])),
    );
    let (latitude, longitude) = coords.first().copied().unwrap_or((None, None));
    let hours_raw = clean_text(row.text("Horaires"));

    let ambiance = collect_tags(row, TagGroup::Ambiance);
    let lieux = collect_tags(row, TagGroup::Lieu);
    let terrace = collect_tags(row, TagGroup::Terrace);
    let types = collect_tags(row, TagGroup::Types);
    let has_terrace = ambiance
        .iter()
        .chain(&lieux)
        .chain(&terrace)
        .any(|t| t.to_lowercase().contains("terrasse"));
    let terrace_locs: Vec<&String> = lieux
        .iter()
        .chain(&terrace)
        .filter(|t| t.to_lowercase().contains("terrasse"))
        .collect();

    let metros = metro_stations_per_address(row, addresses.len());
    let addresses_array: Vec<Value> = addresses
        .iter()
        .enumerate()
        .map(|(i, address)| {
            let (lat, lon) = coords.get(i).copied().unwrap_or((None, None));
            json!({
                "address": address,
                "arrondissement": arrondissements.get(i).cloned().unwrap_or_default(),
                "latitude": optional_f64(lat),
                "longitude": optional_f64(lon),
                "stations_metro": metros.get(i).cloned().unwrap_or_default(),
            })
        })
        .collect();

    let moments = collect_tags(row, TagGroup::Moment);
    let cuisines = collect_tags(row, TagGroup::Cuisine);
    let preferences = collect_tags(row, TagGroup::Preferences);
    let recommended_by = collect_tags(row, TagGroup::RecommendedBy);

    let mut fields = Fields::new();
    extend_fields(&mut fields, json!({
        "id": id,
        "tag": tag,
        "name": name,
        "raw_name": raw_name,
        "address": addresses[0],
        "arrondissement": arrondissements[0],
        "latitude": optional_f64(latitude),
        "longitude": optional_f64(longitude),
        "phone": clean_text(row.text("Téléphone")),
        "website": clean_text(row.text("Site web")),
        "reservation_link": clean_text(row.text("Lien de réservation")),
        "instagram_link": clean_text(row.text("Lien de votre compte instagram")),
        "instagram_video_link": clean_text(row.first(&INSTAGRAM_VIDEO_COLUMNS)),
        "google_link": clean_text(row.text("Lien Google")),
        "lien_menu": clean_text(row.text("Lien Menu")),
        "more_info": clean_text(row.text("Infos")),
    }));
    extend_fields(&mut fields, json!({
        "hours": hours_raw,
        "hours_structured": process_hours(&hours_raw),
        "affichage": collect_display_tags(row),
        "specialite_affichage": specialite_display(row),
        "cuisine_tag": cuisines,
        "specialite_tag": string_to_tag_list(row.text("Spécialité_TAG")),
        "moment_tag": moments,
        "lieu_tag": lieux,
        "ambiance_tag": ambiance,
        "preferences_tag": preferences,
        "type_tag": types,
        "recommended_by_tag": recommended_by,
    }));
    extend_fields(&mut fields, json!({
        "types": types,
        "moments": moments,
        "lieux": lieux,
        "ambiance": ambiance,
        "price_range": collect_tags(row, TagGroup::PriceRange),
        "cuisines": cuisines,
        "preferences": preferences,
        "recommended_by": recommended_by,
    }));
    extend_fields(&mut fields, json!({
        "tag_initial": if tag.is_empty() { vec![] } else { vec![tag.clone()] },
        "restaurant_type": types,
        "location_type": collect_tags(row, TagGroup::LocationType),
        "extras": terrace,
        "has_terrace": has_terrace,
        "terrace_locs": terrace_locs,
        "stations_metro": metros.first().cloned().unwrap_or_default(),
        "addresses": addresses_array,
        "arrondissements": arrondissements,
    }));

    Some(RestaurantRecord {
        id,
        line: row.line,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, &str)]) -> SheetRow {
        let mut row = SheetRow::new(3);
        for (h, v) in cells {
            row.insert(h, *v);
        }
        row
    }

    #[test]
    fn clean_text_folds_spaces_and_dashes() {
        assert_eq!(clean_text("  12:00\u{202f}–\u{a0}14:00 "), "12:00 - 14:00");
    }

    #[test]
    fn ids_are_normalized_from_tags() {
        assert_eq!(normalize_id_from_tag("Chez Nous!"), "CHEZ-NOUS");
        assert_eq!(normalize_id_from_tag("--le_bar--"), "LE_BAR");
        assert_eq!(normalize_id_from_tag("  "), "");
    }

    #[test]
    fn lists_and_tags() {
        assert_eq!(to_list("a, b / c; d|e · f"), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(to_list("['x, y', \"z\"]"), vec!["x, y", "z"]);
        assert_eq!(string_to_tag_list("Italien, non, , Pizza"), vec!["Italien", "Pizza"]);
        assert!(string_to_tag_list("NaN").is_empty());
    }

    #[test]
    fn arrondissements_and_coordinates() {
        assert_eq!(arrondissement_to_postal_code("3"), "75003");
        assert_eq!(arrondissement_to_postal_code("92100"), "92100");
        assert_eq!(arrondissement_to_postal_code("Boulogne"), "Boulogne");
        assert_eq!(parse_arrondissements("11 | 3"), vec!["75011", "75003"]);
        assert_eq!(parse_arrondissements(""), vec![""]);
        assert_eq!(
            parse_multi_coords("48,85;48.86", "2.35"),
            vec![(Some(48.85), Some(2.35)), (Some(48.86), None)]
        );
    }

    #[test]
    fn row_without_ref_is_skipped() {
        assert!(row_to_document(&row(&[("Nom de base", "Sans tag")])).is_none());
    }

    #[test]
    fn row_is_converted_to_document() {
        let record = row_to_document(&row(&[
            ("Ref", "chez nous"),
            ("Nom de base", "Chez Nous"),
            ("Adresse", "1 rue A | 2 rue B"),
            ("Arrondissement", "11|3"),
            ("Latitude", "48.85"),
            ("Longitude", "2.37"),
            ("Station de metro 1", "Bastille | Arts et Métiers"),
            ("Lignes 1", "1, 5 | 3, 11"),
            ("Lieu_TAG", "Terrasse, bar"),
            ("Prix_TAG", "€€"),
            ("Horaires", "Monday: 9:00 - 18:00"),
        ]))
        .unwrap();

        assert_eq!(record.id, "CHEZ-NOUS");
        assert_eq!(record.name(), "Chez Nous");
        assert_eq!(record.address(), "1 rue A");
        let f = &record.fields;
        assert_eq!(f["arrondissement"], "75011");
        assert_eq!(f["lieux"], json!(["Terrasse", "Bar"]));
        assert_eq!(f["has_terrace"], true);
        assert_eq!(f["price_range"], json!(["€€"]));
        assert_eq!(f["tag_initial"], json!(["chez nous"]));
        assert_eq!(
            f["stations_metro"],
            json!([{ "station": "Bastille", "lines": ["1", "5"] }])
        );
        assert_eq!(f["addresses"][1]["arrondissement"], "75003");
        assert_eq!(f["addresses"][1]["latitude"], Value::Null);
        assert_eq!(f["addresses"][1]["stations_metro"][0]["station"], "Arts et Métiers");
        assert_eq!(f["hours_structured"]["Lundi"]["service_1"], "9:00 - 18:00");
        for key in ["id", "more_info", "hours", "recommended_by_tag", "recommended_by", "tag_initial", "arrondissements"] {
            assert!(f.contains_key(key), "missing {}", key);
        }
    }

    #[test]
    fn geocoded_coordinates_fill_only_missing_values() {
        let mut record = row_to_document(&row(&[
            ("Ref", "A"),
            ("Adresse", "1 rue A"),
            ("Latitude", "48.1"),
        ]))
        .unwrap();
        assert!(!record.has_coordinates());
        record.fill_coordinates(50.0, 2.5);
        assert_eq!(record.coordinates(), (Some(48.1), Some(2.5)));
        assert_eq!(record.fields["addresses"][0]["longitude"], 2.5);
    }
}
