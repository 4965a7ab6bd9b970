use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

use crate::database_ops::db::Db;
use crate::database_ops::genres::GenreSeed;
use crate::util::env::parse_flag;

/// `genre_id,parent_genre_id,genre_name,depth[,is_active]`
#[derive(Debug, Deserialize)]
struct GenreRecord {
    genre_id: i64,
    parent_genre_id: Option<i64>,
    genre_name: String,
    depth: i32,
    #[serde(default)]
    is_active: Option<String>,
}

impl GenreRecord {
    fn into_seed(self) -> GenreSeed {
        GenreSeed {
            genre_id: self.genre_id,
            // Root genres are exported with parent 0.
            parent_genre_id: self.parent_genre_id.filter(|p| *p > 0),
            genre_name: self.genre_name,
            depth: self.depth,
            is_active: self
                .is_active
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .is_none_or(parse_flag),
        }
    }
}

/// Parse a headed genre CSV; duplicate ids keep the last row.
pub fn read_genres<R: Read>(reader: R) -> Result<Vec<GenreSeed>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut seeds: Vec<GenreSeed> = Vec::new();
    for (line, rec) in rdr.deserialize::<GenreRecord>().enumerate() {
        let rec = rec.with_context(|| format!("genre csv row {}", line + 2))?;
        if rec.genre_id <= 0 {
            bail!("genre csv row {}: genre_id must be positive", line + 2);
        }
        let seed = rec.into_seed();
        if let Some(prev) = seeds.iter_mut().find(|s| s.genre_id == seed.genre_id) {
            warn!(genre_id = seed.genre_id, "duplicate genre row; keeping the later one");
            *prev = seed;
        } else {
            seeds.push(seed);
        }
    }
    Ok(seeds)
}

pub async fn run(db: &Db, path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let seeds = read_genres(BufReader::new(file))?;
    let written = db.upsert_genres(&seeds).await?;
    info!(path = %path.display(), written, "genre import finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_rows_with_optional_active_column() {
        let csv = "\
genre_id,parent_genre_id,genre_name,depth,is_active
100371,0,Ladies Fashion,1,
555086,100371,Dresses,2,0
551177,,Men's Fashion,1,true
";
        let seeds = read_genres(csv.as_bytes()).unwrap();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0].parent_genre_id, None);
        assert!(seeds[0].is_active);
        assert_eq!(seeds[1].parent_genre_id, Some(100371));
        assert!(!seeds[1].is_active);
        assert_eq!(seeds[2].genre_name, "Men's Fashion");
        assert!(seeds[2].is_active);
    }

    #[test]
    fn four_column_files_default_to_active() {
        let csv = "genre_id,parent_genre_id,genre_name,depth\n100227, 0 , Food ,1\n";
        let seeds = read_genres(csv.as_bytes()).unwrap();
        assert_eq!(
            seeds,
            vec![GenreSeed {
                genre_id: 100227,
                parent_genre_id: None,
                genre_name: "Food".into(),
                depth: 1,
                is_active: true,
            }]
        );
    }

    #[test]
    fn later_duplicate_wins_and_bad_rows_fail() {
        let csv = "genre_id,parent_genre_id,genre_name,depth\n1,0,a,1\n1,0,b,1\n";
        let seeds = read_genres(csv.as_bytes()).unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].genre_name, "b");

        let bad = "genre_id,parent_genre_id,genre_name,depth\nabc,0,a,1\n";
        let err = read_genres(bad.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("row 2"));
    }

    #[test]
    fn reads_from_a_file_on_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "genre_id,parent_genre_id,genre_name,depth").unwrap();
        writeln!(f, "7,0,Books,1").unwrap();
        let seeds = read_genres(BufReader::new(File::open(f.path()).unwrap())).unwrap();
        assert_eq!(seeds[0].genre_id, 7);
    }
}
