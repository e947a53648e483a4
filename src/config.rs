use clap::Args as ClapArgs;

const DEFAULT_API_URL: &str = "https://ads-api.reddit.com/api/v2.0";
const DEFAULT_DATASET: &str = "reddit";
const DEFAULT_TABLE: &str = "redditads";

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
    pub(crate) api_url: String,

    /// OAuth bearer token for the ads API, obtained out-of-band.
    #[arg(long, env = "API_TOKEN")]
    pub(crate) api_token: String,

    /// Ad account all endpoints are scoped to.
    #[arg(long, env = "ACCOUNT_ID")]
    pub(crate) account_id: String,

    #[arg(long, default_value = DEFAULT_DATASET, env = "BQ_DATASET")]
    pub(crate) dataset: String,

    #[arg(long, default_value = DEFAULT_TABLE, env = "BQ_TABLE")]
    pub(crate) table: String,
}
