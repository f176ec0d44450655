use serde::{Deserialize, Serialize};

/// Generic clothing code used when nothing in the table matches.
pub const DEFAULT_CATEGORY_ID: &str = "15687";

#[derive(Debug, Clone, Copy)]
pub struct CategoryDefinition {
    pub keyword: &'static str,
    pub id: &'static str,
    pub label: &'static str,
}

// Order matters: the first keyword found in the text wins, so keywords that
// contain other keywords ("sweatshirt" / "shirt") come first.
pub const CATEGORY_TABLE: [CategoryDefinition; 20] = [
    CategoryDefinition {
        keyword: "panties",
        id: "11507",
        label: "Women's Panties",
    },
    CategoryDefinition {
        keyword: "underwear",
        id: "11507",
        label: "Women's Panties",
    },
    CategoryDefinition {
        keyword: "lingerie",
        id: "11514",
        label: "Women's Intimates & Sleep",
    },
    CategoryDefinition {
        keyword: "sweatshirt",
        id: "155226",
        label: "Men's Hoodies & Sweatshirts",
    },
    CategoryDefinition {
        keyword: "hoodie",
        id: "155226",
        label: "Men's Hoodies & Sweatshirts",
    },
    CategoryDefinition {
        keyword: "t-shirt",
        id: "15687",
        label: "Men's T-Shirts",
    },
    CategoryDefinition {
        keyword: "shirt",
        id: "15687",
        label: "Men's T-Shirts",
    },
    CategoryDefinition {
        keyword: "tee",
        id: "15687",
        label: "Men's T-Shirts",
    },
    CategoryDefinition {
        keyword: "jacket",
        id: "57988",
        label: "Men's Coats & Jackets",
    },
    CategoryDefinition {
        keyword: "jeans",
        id: "11483",
        label: "Men's Jeans",
    },
    CategoryDefinition {
        keyword: "shorts",
        id: "15690",
        label: "Men's Shorts",
    },
    CategoryDefinition {
        keyword: "pants",
        id: "57989",
        label: "Men's Pants",
    },
    CategoryDefinition {
        keyword: "bag",
        id: "169291",
        label: "Women's Bags & Handbags",
    },
    CategoryDefinition {
        keyword: "tote",
        id: "169291",
        label: "Women's Bags & Handbags",
    },
    CategoryDefinition {
        keyword: "patch",
        id: "156521",
        label: "Sewing Patches",
    },
    CategoryDefinition {
        keyword: "button",
        id: "10960",
        label: "Pinback Buttons",
    },
    CategoryDefinition {
        keyword: "hat",
        id: "163571",
        label: "Men's Hats",
    },
    CategoryDefinition {
        keyword: "cap",
        id: "163571",
        label: "Men's Hats",
    },
    CategoryDefinition {
        keyword: "magazine",
        id: "280",
        label: "Magazines",
    },
    CategoryDefinition {
        keyword: "book",
        id: "261186",
        label: "Books",
    },
];

/// First table entry whose keyword occurs in `text`, ignoring case.
pub fn find_category(text: &str) -> Option<&'static CategoryDefinition> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    CATEGORY_TABLE
        .iter()
        .find(|entry| needle.contains(entry.keyword))
}

pub fn category_id_for(text: &str) -> &'static str {
    find_category(text)
        .map(|entry| entry.id)
        .unwrap_or(DEFAULT_CATEGORY_ID)
}

pub fn category_name_for(category_id: &str) -> &'static str {
    CATEGORY_TABLE
        .iter()
        .find(|entry| entry.id == category_id)
        .map(|entry| entry.label)
        .unwrap_or("")
}

/// Normalized sale-condition bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    #[default]
    Preowned,
    Parts,
}

const NEW_SYNONYMS: &[&str] = &[
    "brand new",
    "new with tags",
    "nwt",
    "new without tags",
    "nwot",
    "sealed",
];

const PREOWNED_SYNONYMS: &[&str] = &[
    "used",
    "pre-owned",
    "pre owned",
    "preloved",
    "secondhand",
    "second hand",
    "worn",
    "vintage",
];

const PARTS_SYNONYMS: &[&str] = &[
    "for parts",
    "not working",
    "broken",
    "damaged",
    "as is",
    "as-is",
];

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::Preowned => "preowned",
            Condition::Parts => "parts",
        }
    }

    /// File Exchange `Condition ID`.
    pub fn condition_id(&self) -> u32 {
        match self {
            Condition::New => 1000,
            Condition::Preowned => 3000,
            Condition::Parts => 7000,
        }
    }

    /// Exact canonical spelling only.
    pub fn parse_exact(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "new" => Some(Condition::New),
            "preowned" => Some(Condition::Preowned),
            "parts" => Some(Condition::Parts),
            _ => None,
        }
    }
}

pub fn normalize_condition(input: &str, default: Condition) -> Condition {
    let value = input.trim().to_lowercase();
    if value.is_empty() {
        return default;
    }
    if let Some(exact) = Condition::parse_exact(&value) {
        return exact;
    }
    if NEW_SYNONYMS.contains(&value.as_str()) {
        return Condition::New;
    }
    if PREOWNED_SYNONYMS.contains(&value.as_str()) {
        return Condition::Preowned;
    }
    if PARTS_SYNONYMS.contains(&value.as_str()) {
        return Condition::Parts;
    }
    if value.contains("part") || value.contains("repair") {
        return Condition::Parts;
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_lookup_is_substring_and_case_insensitive() {
        assert_eq!(category_id_for("Vintage Nike HOODIE"), "155226");
        assert_eq!(category_id_for("graphic t-shirt"), "15687");
        assert_eq!(category_id_for("Levi's 501 Jeans"), "11483");
        assert_eq!(category_id_for("canvas tote"), "169291");
    }

    #[test]
    fn category_lookup_prefers_specific_keywords() {
        assert_eq!(category_id_for("crewneck sweatshirt"), "155226");
        assert_eq!(category_id_for("lace lingerie set"), "11514");
    }

    #[test]
    fn category_lookup_defaults() {
        assert_eq!(category_id_for(""), DEFAULT_CATEGORY_ID);
        assert_eq!(category_id_for("   "), DEFAULT_CATEGORY_ID);
        assert_eq!(category_id_for("ceramic vase"), DEFAULT_CATEGORY_ID);
    }

    #[test]
    fn category_names_follow_ids() {
        assert_eq!(category_name_for("11483"), "Men's Jeans");
        assert_eq!(category_name_for("999999"), "");
    }

    #[test]
    fn condition_canonical_values() {
        for (raw, expected) in [
            ("new", Condition::New),
            ("PREOWNED", Condition::Preowned),
            (" parts ", Condition::Parts),
        ] {
            assert_eq!(normalize_condition(raw, Condition::New), expected);
        }
    }

    #[test]
    fn condition_synonyms_map_to_buckets() {
        for raw in NEW_SYNONYMS {
            assert_eq!(normalize_condition(raw, Condition::Parts), Condition::New);
        }
        for raw in PREOWNED_SYNONYMS {
            assert_eq!(
                normalize_condition(raw, Condition::New),
                Condition::Preowned
            );
        }
        for raw in PARTS_SYNONYMS {
            assert_eq!(normalize_condition(raw, Condition::New), Condition::Parts);
        }
    }

    #[test]
    fn condition_part_or_repair_substring() {
        assert_eq!(
            normalize_condition("needs repair", Condition::New),
            Condition::Parts
        );
        assert_eq!(
            normalize_condition("spare parts only", Condition::New),
            Condition::Parts
        );
    }

    #[test]
    fn condition_unknown_uses_default() {
        assert_eq!(
            normalize_condition("excellent", Condition::Preowned),
            Condition::Preowned
        );
        assert_eq!(normalize_condition("", Condition::New), Condition::New);
        assert_eq!(normalize_condition("mint", Condition::New), Condition::New);
    }

    #[test]
    fn condition_ids() {
        assert_eq!(Condition::New.condition_id(), 1000);
        assert_eq!(Condition::Preowned.condition_id(), 3000);
        assert_eq!(Condition::Parts.condition_id(), 7000);
    }
}
