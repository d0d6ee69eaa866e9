use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mapping input not found: {path}")]
    MissingInput { path: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv parse error in {path}: {source}")]
    CsvParse {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path} is missing required column(s): {}", missing.join(", "))]
    MissingColumns { path: String, missing: Vec<String> },

    #[error("{path} contains no mapping rows")]
    EmptyInput { path: String },

    #[error("missing required setting '{0}'")]
    MissingSetting(&'static str),
}
