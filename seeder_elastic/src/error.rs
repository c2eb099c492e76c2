use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ElasticError {
    #[snafu(display("invalid Elasticsearch url: {url}"))]
    InvalidUrl { url: String },
    #[snafu(display("failed to build HTTP client"))]
    Client { source: reqwest::Error },
}

pub type Result<T, E = ElasticError> = std::result::Result<T, E>;
