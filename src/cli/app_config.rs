use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Time the phases of an HTTP(S) request", long_about = None)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// The pem path.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Maximum time allowed for each request, in seconds
    #[arg(short = 'm', long = "max-time", value_name = "seconds", default_value_t = 30.0)]
    pub max_time: f64,
    /// Send the request this many times over one keep-alive client
    #[arg(short = 'n', long = "count", value_name = "count", default_value_t = 1)]
    pub count: usize,
    /// Print the timings as JSON
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["rtimer", "http://localhost/"]);
        assert_eq!(cli.url, "http://localhost/");
        assert_eq!(cli.count, 1);
        assert_eq!(cli.verbosity, 0);
        assert!(!cli.json);
        assert_eq!(cli.max_time, 30.0);
    }

    #[test]
    fn repeated_flags() {
        let cli = Cli::parse_from([
            "rtimer",
            "https://localhost/",
            "-X",
            "POST",
            "-d",
            "a=1",
            "-H",
            "x-a: 1",
            "-H",
            "x-b: 2",
            "-k",
            "-n",
            "3",
            "-vv",
            "--json",
        ]);
        assert_eq!(cli.method_option.as_deref(), Some("POST"));
        assert_eq!(cli.body_option.as_deref(), Some("a=1"));
        assert_eq!(cli.headers.len(), 2);
        assert!(cli.skip_certificate_validate);
        assert_eq!(cli.count, 3);
        assert_eq!(cli.verbosity, 2);
        assert!(cli.json);
    }
}
