//! Which raw files feed a given year.
//!
//! Default locations are tried first; when they are missing, the
//! `files_per_year.json` table supplies the paths that the statistics office
//! actually delivered for that year.
use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub const DEFAULT_EDGE_ROOT: &str = "G:\\Bevolking";
pub const DEFAULT_SEP: char = ';';

/// Edge files delivered with `,` instead of `;`.
static COMMA_SEPARATED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "HUISGENOTENNETWERK2021TABV1.csv",
        "BURENNETWERK2023TABV1.csv",
        "FAMILIENETWERK2023TABV1.csv",
        "HUISGENOTENNETWERK2023TABV1.csv",
    ]
    .into_iter()
    .collect()
});

/// A JSON value that is either one path or a list of paths.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PathList {
    One(String),
    Many(Vec<String>),
}

impl PathList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            PathList::One(p) => vec![p.clone()],
            PathList::Many(ps) => ps.clone(),
        }
    }
}

/// Contents of `files_per_year.json`, keyed by year string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesPerYear {
    #[serde(default)]
    pub node_files: BTreeMap<String, PathList>,
    #[serde(default)]
    pub edge_files: BTreeMap<String, PathList>,
}

impl FilesPerYear {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening lookup table {}", path.display()))?;
        let table: FilesPerYear = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing lookup table {}", path.display()))?;
        debug!(
            node_years = table.node_files.len(),
            edge_years = table.edge_files.len(),
            "loaded lookup table"
        );
        Ok(table)
    }

    pub fn node_files_for(&self, year: u32) -> Result<Vec<String>> {
        self.node_files
            .get(&year.to_string())
            .map(PathList::to_vec)
            .ok_or_else(|| anyhow!("no node_files entry for year {} in lookup table", year))
    }

    pub fn edge_files_for(&self, year: u32) -> Result<Vec<String>> {
        self.edge_files
            .get(&year.to_string())
            .map(PathList::to_vec)
            .ok_or_else(|| anyhow!("no edge_files entry for year {} in lookup table", year))
    }
}

/// Node file candidates; the first one is the default, the rest are optional
/// extras kept only when present.
pub fn default_node_files(node_data_folder: &Path, start: u32, end: u32, year: u32) -> Vec<PathBuf> {
    vec![node_data_folder.join(format!(
        "base_start_{}_end_{}_year_{}.csv.gz",
        start, end, year
    ))]
}

/// The five CBS network tables, in layer order.
pub fn default_edge_files(edge_root: &Path, year: u32) -> Vec<PathBuf> {
    [
        ("BURENNETWERKTAB", format!("BURENNETWERK{}TABV1.csv", year)),
        ("COLLEGANETWERKTAB", format!("COLLEGANETWERK{}TABV2.csv", year)),
        ("FAMILIENETWERKTAB", format!("FAMILIENETWERK{}TABV1.csv", year)),
        ("HUISGENOTENNETWERKTAB", format!("HUISGENOTENNETWERK{}TABV1.csv", year)),
        ("KLASGENOTENNETWERKTAB", format!("KLASGENOTENNETWERK{}TABV1.csv", year)),
    ]
    .into_iter()
    .map(|(dir, name)| edge_root.join(dir).join(name))
    .collect()
}

fn display(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Default node file if it exists, else the lookup entry; extra candidates
/// are appended only when they exist.
pub fn resolve_node_files(candidates: &[PathBuf], year: u32, table: &FilesPerYear) -> Result<Vec<String>> {
    let Some((main, extras)) = candidates.split_first() else {
        return table.node_files_for(year);
    };

    let mut resolved = if main.exists() {
        vec![display(main)]
    } else {
        warn!(path = %main.display(), "default node file missing, using lookup table");
        table.node_files_for(year)?
    };
    resolved.extend(extras.iter().filter(|p| p.exists()).map(|p| display(p)));
    Ok(resolved)
}

/// All defaults if every one exists, otherwise the lookup list for the year.
/// Never mixes the two.
pub fn resolve_edge_files(candidates: &[PathBuf], year: u32, table: &FilesPerYear) -> Result<Vec<String>> {
    let mut all_exist = true;
    for ef in candidates {
        if !ef.exists() {
            all_exist = false;
            println!("{} was not found!", ef.display());
        }
    }
    if all_exist {
        Ok(candidates.iter().map(|p| display(p)).collect())
    } else {
        table.edge_files_for(year)
    }
}

/// Last path component, accepting both `/` and `\` as separators.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Field separator of an edge file.
pub fn separator_for(path: &str) -> char {
    if COMMA_SEPARATED.contains(file_name(path)) {
        ','
    } else {
        DEFAULT_SEP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn table() -> FilesPerYear {
        serde_json::from_str(
            r#"{
                "node_files": {"2015": "G:\\GBAPERSOONTAB\\2015\\GBAPERSOON2015TABV1.csv"},
                "edge_files": {"2015": ["a.csv", "b.csv", "c.csv", "d.csv", "e.csv"]}
            }"#,
        )
        .unwrap()
    }

    fn touch(p: &Path) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn node_default_wins_when_present() {
        let tmp = tempdir().unwrap();
        let candidates = default_node_files(tmp.path(), 2009, 2023, 2015);
        touch(&candidates[0]);

        let got = resolve_node_files(&candidates, 2015, &table()).unwrap();
        assert_eq!(got, vec![display(&candidates[0])]);
    }

    #[test]
    fn node_falls_back_to_lookup() {
        let tmp = tempdir().unwrap();
        let candidates = default_node_files(tmp.path(), 2009, 2023, 2015);

        let got = resolve_node_files(&candidates, 2015, &table()).unwrap();
        assert_eq!(got, vec!["G:\\GBAPERSOONTAB\\2015\\GBAPERSOON2015TABV1.csv".to_string()]);
    }

    #[test]
    fn node_extras_only_when_present() {
        let tmp = tempdir().unwrap();
        let mut candidates = default_node_files(tmp.path(), 2009, 2023, 2015);
        let present = tmp.path().join("location_2015.csv.gz");
        let absent = tmp.path().join("income_2015.csv.gz");
        touch(&candidates[0]);
        touch(&present);
        candidates.push(present.clone());
        candidates.push(absent);

        let got = resolve_node_files(&candidates, 2015, &table()).unwrap();
        assert_eq!(got, vec![display(&candidates[0]), display(&present)]);
    }

    #[test]
    fn missing_year_is_an_error() {
        let tmp = tempdir().unwrap();
        let candidates = default_node_files(tmp.path(), 2009, 2023, 2011);
        let err = resolve_node_files(&candidates, 2011, &table()).unwrap_err();
        assert!(err.to_string().contains("2011"));

        let edges = default_edge_files(tmp.path(), 2011);
        assert!(resolve_edge_files(&edges, 2011, &table()).is_err());
    }

    #[test]
    fn edge_defaults_in_order_when_all_exist() {
        let tmp = tempdir().unwrap();
        let candidates = default_edge_files(tmp.path(), 2015);
        candidates.iter().for_each(|p| touch(p));

        let got = resolve_edge_files(&candidates, 2015, &table()).unwrap();
        assert_eq!(got.len(), 5);
        assert!(got[0].ends_with("BURENNETWERK2015TABV1.csv"));
        assert!(got[1].ends_with("COLLEGANETWERK2015TABV2.csv"));
        assert!(got[4].ends_with("KLASGENOTENNETWERK2015TABV1.csv"));
    }

    #[test]
    fn one_missing_edge_file_replaces_the_whole_list() {
        let tmp = tempdir().unwrap();
        let candidates = default_edge_files(tmp.path(), 2015);
        candidates.iter().skip(1).for_each(|p| touch(p));

        let got = resolve_edge_files(&candidates, 2015, &table()).unwrap();
        assert_eq!(got, vec!["a.csv", "b.csv", "c.csv", "d.csv", "e.csv"]);
    }

    #[test]
    fn separator_exceptions() {
        let root = Path::new(DEFAULT_EDGE_ROOT);
        let y2021 = default_edge_files(root, 2021);
        let y2023 = default_edge_files(root, 2023);
        let y2022 = default_edge_files(root, 2022);

        let seps = |files: &[PathBuf]| -> Vec<char> {
            files.iter().map(|p| separator_for(&display(p))).collect()
        };
        assert_eq!(seps(&y2021), vec![';', ';', ';', ',', ';']);
        assert_eq!(seps(&y2023), vec![',', ';', ',', ',', ';']);
        assert_eq!(seps(&y2022), vec![';'; 5]);

        assert_eq!(
            separator_for("G:\\Bevolking\\HUISGENOTENNETWERKTAB\\HUISGENOTENNETWERK2021TABV1.csv"),
            ','
        );
        assert_eq!(separator_for("/data/BURENNETWERK2023TABV1.csv"), ',');
        assert_eq!(separator_for("BURENNETWERK2023TABV2.csv"), ';');
    }
}
