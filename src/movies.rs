use std::{collections::HashMap, io::Read, path::Path};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Full catalog entry as stored in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub original_language: String,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_count: i64,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub imdb_id: Option<String>,
}

/// A movie annotated with the similarity that surfaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub movie: MovieRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Raw row of `movies_metadata.csv`. Every column is text; the export mixes
/// Python literals (`True`, `[{'id': 1, ...}]`) with plain values.
#[derive(Debug, Deserialize)]
struct CsvRow {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    tagline: String,
    #[serde(default)]
    overview: String,
    #[serde(default)]
    poster_path: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    vote_average: String,
    #[serde(default)]
    genres: String,
    #[serde(default)]
    adult: String,
    #[serde(default)]
    original_language: String,
    #[serde(default)]
    popularity: String,
    #[serde(default)]
    vote_count: String,
    #[serde(default)]
    video: String,
    #[serde(default)]
    original_title: String,
    #[serde(default)]
    imdb_id: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn python_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Parses the genres column, which is a Python list literal with single quotes.
pub fn parse_genres(raw: &str) -> Option<Vec<Genre>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(vec![]);
    }

    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_str(&raw.replace('\'', "\"")))
        .ok()
}

impl TryFrom<CsvRow> for MovieRecord {
    type Error = String;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid id {:?}", row.id))?;

        let genres = parse_genres(&row.genres).unwrap_or_else(|| {
            log::debug!("movie {id}: unparsable genres {:?}", row.genres);
            vec![]
        });

        Ok(MovieRecord {
            id,
            title: row.title.trim().to_string(),
            tagline: non_empty(row.tagline),
            overview: row.overview,
            poster_path: non_empty(row.poster_path),
            release_date: non_empty(row.release_date),
            vote_average: row.vote_average.trim().parse().unwrap_or_default(),
            genres,
            adult: python_bool(&row.adult),
            original_language: row.original_language,
            popularity: row.popularity.trim().parse().unwrap_or_default(),
            vote_count: row
                .vote_count
                .trim()
                .parse::<f64>()
                .map(|v| v as i64)
                .unwrap_or_default(),
            video: python_bool(&row.video),
            original_title: row.original_title,
            imdb_id: non_empty(row.imdb_id),
        })
    }
}

/// Result of loading the movies CSV.
#[derive(Debug, Default)]
pub struct MovieCatalog {
    pub movies: HashMap<i64, MovieRecord>,
    /// Rows that could not be parsed and were left out
    pub skipped: usize,
}

impl MovieCatalog {
    pub fn from_reader(reader: impl Read) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let mut catalog = MovieCatalog::default();

        for row in rdr.deserialize::<CsvRow>() {
            let record = match row {
                Ok(row) => MovieRecord::try_from(row),
                Err(err) if err.is_io_error() => return Err(err),
                Err(err) => Err(err.to_string()),
            };

            match record {
                Ok(movie) => {
                    // first row wins, the export contains a few duplicated ids
                    catalog.movies.entry(movie.id).or_insert(movie);
                }
                Err(err) => {
                    log::debug!("skipping movie row: {err}");
                    catalog.skipped += 1;
                }
            }
        }

        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }
}
