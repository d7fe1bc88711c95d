use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::path::Path;

/// Output names for the five CBS layer files, in the same order as the
/// default edge files they are built from.
pub const ADJACENCY_NAMES: [&str; 5] = [
    "neighbor_detailed_adjacency.npz",
    "work_detailed_adjacency.npz",
    "family_detailed_adjacency.npz",
    "household_detailed_adjacency.npz",
    "school_detailed_adjacency.npz",
];

pub const DEFAULT_CHUNKSIZE: usize = 100_000_000;

/// Ordered source-column → canonical-column mapping.
///
/// Only columns present here survive a read, so identity entries
/// (`"gender" => "gender"`) are needed for columns that keep their name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnMap(IndexMap<String, String>);

impl ColumnMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn with(mut self, source: &str, target: &str) -> Self {
        self.insert(source, target);
        self
    }

    /// Insert or overwrite the mapping for `source`, keeping its position.
    pub fn insert(&mut self, source: &str, target: &str) {
        self.0.insert(source.to_string(), target.to_string());
    }

    pub fn target(&self, source: &str) -> Option<&str> {
        self.0.get(source).map(String::as_str)
    }

    /// Canonical names in mapping order, without repeats.
    pub fn targets(&self) -> IndexSet<&str> {
        self.0.values().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(s, t)| (s.to_string(), t.to_string()))
                .collect(),
        )
    }
}

/// How node tables are read and where the merged table is written.
#[derive(Debug, Clone, Serialize)]
pub struct NodeConf {
    pub input_folder_prefix: String,
    pub files: Vec<String>,
    /// Index into `files` of the table that defines the node set.
    pub main_file: usize,
    pub colmap: ColumnMap,
    pub sep: char,
    pub geo_shp_folder: String,
    pub output: String,
    pub add_geo: bool,
}

/// How one layer's edge file is read and where its adjacency matrix goes.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeConf {
    pub input_folder_prefix: String,
    pub files: Vec<String>,
    pub colmap: ColumnMap,
    pub sep: char,
    pub output: String,
    /// Row limit per file, for test runs.
    pub nrows: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerConf {
    pub input_folder_prefix: String,
    pub raw_file: String,
    /// Prepared layer table; when set it is read instead of `raw_file`.
    pub file: String,
    pub output: String,
    pub symmetrize: Vec<String>,
    pub symmetrize_all: bool,
    pub raw_sep: char,
    pub sep: char,
    /// Optional `group,color` CSV joined onto the layer table.
    pub colors: String,
    pub colmap: Option<ColumnMap>,
}

/// Everything one conversion run needs.
#[derive(Debug, Clone, Serialize)]
pub struct MlnConfig {
    pub node_conf: NodeConf,
    pub edge_conf: EdgeConf,
    pub layer_conf: LayerConf,
    /// Encode relation groups instead of single relations as matrix bits.
    pub grouped: bool,
    pub use_polars: bool,
    /// Number of edge records buffered before the buffer is compacted.
    pub chunksize: usize,
}

impl MlnConfig {
    pub fn new(node_conf: NodeConf, edge_conf: EdgeConf, layer_conf: LayerConf) -> Self {
        Self {
            node_conf,
            edge_conf,
            layer_conf,
            grouped: false,
            use_polars: true,
            chunksize: DEFAULT_CHUNKSIZE,
        }
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Columns kept from the yearly node files.
pub fn cbs_node_colmap() -> ColumnMap {
    [
        ("RINPERSOON", "label"),
        ("label", "label"),
        ("id", "id"),
        ("gender", "gender"),
        ("migrant_generation", "migrant_generation"),
        ("birth_year", "birth_year"),
        ("active", "active"),
        ("missing_mother", "missing_mother"),
        ("missing_father", "missing_father"),
        ("number_of_parents_from_abroad", "number_of_parents_from_abroad"),
        ("household_income", "household_income"),
        ("household_income_percentile", "household_income_percentile"),
        ("individual_income_gross", "individual_income_gross"),
        ("individual_income_percentile", "individual_income_percentile"),
        ("socioeconomic_situation", "socioeconomic_situation"),
        ("household_change_year", "household_change_year"),
        ("gemeente_code", "gemeente_code"),
        ("wijk_code", "wijk_code"),
        ("buurt_code", "buurt_code"),
    ]
    .into_iter()
    .collect()
}

/// Column renames shared by all CBS network tables.
pub fn cbs_edge_colmap() -> ColumnMap {
    ColumnMap::new()
        .with("RINPERSOON", "source")
        .with("RINPERSOONRELATIE", "target")
        .with("RELATIE", "layer")
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

impl NodeConf {
    pub fn cbs(files: Vec<String>, year_dir: &Path) -> Self {
        Self {
            input_folder_prefix: String::new(),
            files,
            main_file: 0,
            colmap: cbs_node_colmap(),
            sep: ',',
            geo_shp_folder: String::new(),
            output: path_string(&year_dir.join("nodes.csv.gz")),
            add_geo: false,
        }
    }
}

impl EdgeConf {
    /// Base edge configuration; `files`, `output` and `sep` are set per layer.
    pub fn cbs_base(year_dir: &Path) -> Self {
        Self {
            input_folder_prefix: String::new(),
            files: Vec::new(),
            colmap: cbs_edge_colmap(),
            sep: ';',
            output: path_string(year_dir),
            nrows: None,
        }
    }

    /// Copy of `self` restricted to one input file and one output matrix.
    pub fn for_layer(&self, file: &str, adjacency_name: &str, sep: char) -> Self {
        let mut conf = self.clone();
        conf.files = vec![file.to_string()];
        conf.output = path_string(&Path::new(&self.output).join(adjacency_name));
        conf.sep = sep;
        conf
    }
}

impl LayerConf {
    pub fn cbs(raw_file: &str, year_dir: &Path) -> Self {
        Self {
            input_folder_prefix: String::new(),
            raw_file: raw_file.to_string(),
            file: String::new(),
            output: path_string(&year_dir.join("layers.csv")),
            symmetrize: Vec::new(),
            symmetrize_all: false,
            raw_sep: ',',
            sep: ',',
            colors: String::new(),
            colmap: None,
        }
    }
}
