use crate::ebay::taxonomy::find_category;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const PHOTO_SEPARATOR: &str = "|";

/// eBay File Exchange bulk-upload header. Row values are keyed by these names.
pub const FILE_EXCHANGE_HEADERS: [&str; 54] = [
    "Action(SiteID=US|Country=US|Currency=USD|Version=1193)",
    "Custom label (SKU)",
    "Category ID",
    "Category name",
    "Title",
    "Relationship",
    "Relationship details",
    "Schedule Time",
    "P:UPC",
    "P:EPID",
    "Start price",
    "Quantity",
    "Item photo URL",
    "VideoID",
    "Condition ID",
    "Description",
    "Format",
    "Duration",
    "Buy It Now price",
    "Best Offer Enabled",
    "Best Offer Auto Accept Price",
    "Minimum Best Offer Price",
    "Immediate pay required",
    "Location",
    "Shipping service 1 option",
    "Shipping service 1 cost",
    "Shipping service 1 priority",
    "Shipping service 2 option",
    "Shipping service 2 cost",
    "Shipping service 2 priority",
    "Max dispatch time",
    "Returns accepted option",
    "Returns within option",
    "Refund option",
    "Return shipping cost paid by",
    "Shipping profile name",
    "Return profile name",
    "Payment profile name",
    "ProductCompliancePolicyID",
    "Regional ProductCompliancePolicies",
    "C:Style",
    "C:Brand",
    "C:Size Type",
    "C:Color",
    "C:Department",
    "C:Size",
    "C:Type",
    "C:Features",
    "C:Character",
    "C:Theme",
    "C:Material",
    "C:Fabric Type",
    "C:Pattern",
    "C:Vintage",
];

// Older File Exchange templates use compact names for the same fields.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("customlabel", "custom label (sku)"),
    ("category", "category id"),
    ("categoryname", "category name"),
    ("scheduletime", "schedule time"),
    ("startprice", "start price"),
    ("picurl", "item photo url"),
    ("conditionid", "condition id"),
    ("dispatchtimemax", "max dispatch time"),
    ("shippingprofilename", "shipping profile name"),
    ("returnprofilename", "return profile name"),
    ("paymentprofilename", "payment profile name"),
];

/// Key used to match a template column to a row value: required-field
/// markers and case are ignored, the `Action(...)` column matches any
/// site/version suffix, and legacy compact names map to current ones.
pub fn canonical_column(name: &str) -> String {
    let key = name.trim().trim_start_matches('*').trim().to_lowercase();
    if key.starts_with("action(") || key == "action" {
        return "action".to_string();
    }
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, current)| current.to_string())
        .unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub photo_separator: &'static str,
}

impl HeaderSchema {
    pub fn file_exchange() -> Self {
        Self {
            name: "file_exchange".to_string(),
            columns: FILE_EXCHANGE_HEADERS.iter().map(|c| c.to_string()).collect(),
            photo_separator: PHOTO_SEPARATOR,
        }
    }
}

pub static FILE_EXCHANGE: Lazy<Arc<HeaderSchema>> =
    Lazy::new(|| Arc::new(HeaderSchema::file_exchange()));

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse template {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("template {path} has no header row")]
    Empty { path: PathBuf },
}

/// Template headers keyed by lowercase file stem (category keyword or
/// category ID). Built once at startup; read-only afterwards.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Arc<HeaderSchema>>,
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::empty();
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target: "chatbay.export",
                    dir = %dir.display(),
                    error = %err,
                    "template directory unreadable; using File Exchange header"
                );
                return Self::empty();
            }
        };

        let mut templates = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_csv = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_csv {
                continue;
            }
            match read_template_header(&path) {
                Ok(columns) => {
                    let key = stem.trim().to_lowercase();
                    templates.insert(
                        key.clone(),
                        Arc::new(HeaderSchema {
                            name: key,
                            columns,
                            photo_separator: PHOTO_SEPARATOR,
                        }),
                    );
                }
                Err(err) => {
                    warn!(target: "chatbay.export", error = %err, "template skipped");
                }
            }
        }
        info!(target: "chatbay.export", templates = templates.len(), "templates loaded");
        Self { templates }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template for the category ID, then for the category keyword found in
    /// `category_text`, else the File Exchange header.
    pub fn for_category(&self, category_id: &str, category_text: &str) -> Arc<HeaderSchema> {
        let by_id = self.templates.get(&category_id.trim().to_lowercase());
        let by_keyword = || {
            find_category(category_text).and_then(|entry| self.templates.get(entry.keyword))
        };
        by_id
            .or_else(by_keyword)
            .cloned()
            .unwrap_or_else(|| FILE_EXCHANGE.clone())
    }
}

/// First non-comment record of the file, trimmed and deduplicated.
pub fn read_template_header(path: &Path) -> Result<Vec<String>, TemplateError> {
    let file = std::fs::File::open(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    for record in reader.records() {
        let record = record.map_err(|source| TemplateError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let first = record.get(0).unwrap_or_default().trim_start_matches('\u{feff}');
        if first.trim().starts_with('#') {
            continue;
        }
        let mut seen = HashSet::new();
        let columns: Vec<String> = record
            .iter()
            .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
            .filter(|cell| !cell.is_empty())
            .filter(|cell| seen.insert(cell.clone()))
            .collect();
        if columns.is_empty() {
            break;
        }
        return Ok(columns);
    }
    Err(TemplateError::Empty {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chatbay-templates-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_exchange_header_starts_with_action() {
        let schema = HeaderSchema::file_exchange();
        assert_eq!(schema.columns.len(), 54);
        assert_eq!(
            schema.columns[0],
            "Action(SiteID=US|Country=US|Currency=USD|Version=1193)"
        );
        assert_eq!(schema.photo_separator, "|");
        let unique: HashSet<_> = schema.columns.iter().collect();
        assert_eq!(unique.len(), schema.columns.len());
    }

    #[test]
    fn canonical_names_ignore_markers_and_aliases() {
        assert_eq!(
            canonical_column("*Action(SiteID=US|Country=US|Currency=USD|Version=745)"),
            "action"
        );
        assert_eq!(canonical_column("*StartPrice"), "start price");
        assert_eq!(canonical_column("PicURL"), "item photo url");
        assert_eq!(canonical_column(" C:Brand "), "c:brand");
    }

    #[test]
    fn loads_templates_by_keyword_and_id() {
        let dir = scratch_dir();
        std::fs::write(
            dir.join("hoodie.csv"),
            "#INFO,Version=1.0\n*Action(SiteID=US|Country=US|Currency=USD|Version=1193),*Title,*Title,C:Brand\n",
        )
        .unwrap();
        std::fs::write(dir.join("57988.csv"), "Action,Title,Start price\n").unwrap();
        std::fs::write(dir.join("broken.csv"), "").unwrap();
        std::fs::write(dir.join("notes.txt"), "Title\n").unwrap();

        let catalog = TemplateCatalog::load(Some(&dir));
        assert_eq!(catalog.len(), 2);

        let hoodie = catalog.for_category("155226", "grey hoodie");
        assert_eq!(hoodie.columns.len(), 3);
        assert_eq!(hoodie.columns[1], "*Title");

        let jacket = catalog.for_category("57988", "");
        assert_eq!(jacket.columns, vec!["Action", "Title", "Start price"]);

        let fallback = catalog.for_category("15687", "tee");
        assert_eq!(fallback.columns.len(), 54);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_directory_falls_back() {
        let catalog = TemplateCatalog::load(Some(Path::new("/nonexistent/chatbay/templates")));
        assert!(catalog.is_empty());
        assert_eq!(catalog.for_category("57988", "jacket").name, "file_exchange");
        assert!(TemplateCatalog::load(None).is_empty());
    }
}
