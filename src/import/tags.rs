//! Tag collection from the `*_TAG` and `*_AFFICHAGE` columns of a row.

use super::sheet::SheetRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagGroup {
    Types,
    Moment,
    LocationType,
    Lieu,
    Ambiance,
    PriceRange,
    Cuisine,
    Preferences,
    Terrace,
    RecommendedBy,
}

impl TagGroup {
    fn columns(&self) -> &'static [&'static str] {
        match self {
            TagGroup::Types | TagGroup::Cuisine => &["Spécialité_TAG"],
            TagGroup::Moment => &["Moment_TAG"],
            TagGroup::LocationType | TagGroup::Lieu => &["Lieu_TAG"],
            TagGroup::Ambiance => &["Ambiance_TAG"],
            TagGroup::PriceRange => &["Prix_TAG"],
            TagGroup::Preferences => &["Préférences_TAG", "Restrictions_TAG", "Préférences"],
            TagGroup::Terrace => &["Lieu_TAG", "Ambiance_TAG"],
            TagGroup::RecommendedBy => &["recommandé par - TAG"],
        }
    }

    /// Spellings the mobile app filters on; matching is case-insensitive.
    fn canonical_values(&self) -> &'static [&'static str] {
        match self {
            TagGroup::Moment => &[
                "Petit-déjeuner",
                "Brunch",
                "Déjeuner",
                "Goûter",
                "Drinks",
                "Dîner",
                "Sans réservation",
            ],
            TagGroup::Ambiance => &["Entre amis", "En famille", "Date", "Festif"],
            TagGroup::Cuisine => &[
                "Italien",
                "Méditerranéen",
                "Asiatique",
                "Français",
                "Sud-Américain",
                "Américain",
                "Japonais",
                "Indien",
                "Africain",
                "Other",
                "Israélien",
            ],
            TagGroup::Lieu | TagGroup::LocationType => &[
                "Bar",
                "Cave à manger",
                "Coffee shop",
                "Terrasse",
                "Fast",
                "Brasserie",
                "Hôtel",
                "Gastronomique",
                "Salle privatisable",
            ],
            _ => &[],
        }
    }
}

const DISPLAY_COLUMNS: [&str; 6] = [
    "Moment_AFFICHAGE",
    "Ambiance_AFFICHAGE",
    "Lieu_AFFICHAGE",
    "Préférences_AFFICHAGE",
    "Restrictions_AFFICHAGE",
    "recommandé par - AFFICHAGE",
];

/// `non`, `nan` and blanks mean "no value" in the workbook.
pub fn is_placeholder(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "" | "non" | "nan")
}

fn normalize_case(tag: &str, group: TagGroup) -> String {
    let lower = tag.trim().to_lowercase();
    group
        .canonical_values()
        .iter()
        .find(|c| c.to_lowercase() == lower)
        .map(|c| c.to_string())
        .unwrap_or_else(|| tag.to_string())
}

fn normalize_preference(tag: &str) -> String {
    let lower = tag.trim().to_lowercase();
    if lower.contains("casher") {
        "Casher".to_string()
    } else if lower.contains("végétarien") || lower.contains("vegetarien") {
        "100% végétarien".to_string()
    } else if lower.contains("healthy") {
        "Healthy".to_string()
    } else {
        tag.to_string()
    }
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !value.is_empty() && !out.contains(&value) {
        out.push(value);
    }
}

/// Ordered, de-duplicated tags of `group`.
pub fn collect_tags(row: &SheetRow, group: TagGroup) -> Vec<String> {
    let mut out = Vec::new();
    for column in group.columns() {
        let value = row.text(column);
        if is_placeholder(value) {
            continue;
        }
        for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match group {
                TagGroup::Terrace => {
                    let lower = tag.to_lowercase();
                    if lower.contains("terrasse") || lower.contains("rooftop") || lower.contains("cour") {
                        push_unique(&mut out, tag.to_string());
                    }
                }
                TagGroup::Preferences => push_unique(&mut out, normalize_preference(tag)),
                TagGroup::RecommendedBy => push_unique(&mut out, tag.to_string()),
                _ => {
                    let normalized = normalize_case(tag, group);
                    push_unique(&mut out, normalized.trim_end_matches('`').trim().to_string());
                }
            }
        }
    }
    out
}

/// Display labels from the `*_AFFICHAGE` columns, speciality excluded.
pub fn collect_display_tags(row: &SheetRow) -> Vec<String> {
    let mut out = Vec::new();
    for column in DISPLAY_COLUMNS {
        let value = row.text(column);
        if is_placeholder(value) {
            continue;
        }
        for item in value.split(',').map(str::trim) {
            push_unique(&mut out, item.to_string());
        }
    }
    out
}

pub fn specialite_display(row: &SheetRow) -> String {
    let value = row.text("Spécialité_AFFICHAGE").trim();
    if is_placeholder(value) {
        String::new()
    } else {
        value.to_string()
    }
}
