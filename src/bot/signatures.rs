//! User-Agent Signatures
//!
//! Regex tables for bot-like agents (crawlers, scanners) and HTTP automation
//! tools (command-line clients, scripting libraries, headless browsers).

use regex::Regex;
use std::sync::LazyLock;

/// What a User-Agent string reveals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentClass {
    /// Name of the matched bot/crawler/scanner signature
    pub bot: Option<String>,
    /// Name of the matched automation tool signature
    pub automation_tool: Option<String>,
}

impl UserAgentClass {
    pub fn is_bot_like(&self) -> bool {
        self.bot.is_some()
    }

    pub fn is_automation_tool(&self) -> bool {
        self.automation_tool.is_some()
    }
}

/// Self-identified bots, crawlers and scanners
static BOT_PATTERNS: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        (r"(?i)bot\b|bot/|bot;", "Generic Bot"),
        (r"(?i)crawler|crawl/", "Crawler"),
        (r"(?i)spider", "Spider"),
        (r"(?i)scraper", "Scraper"),
        (r"(?i)scrapy", "Scrapy"),
        (r"(?i)httrack", "HTTrack"),
        (r"(?i)nikto", "Nikto Scanner"),
        (r"(?i)sqlmap", "SQLMap"),
        (r"(?i)masscan", "Masscan"),
        (r"(?i)nuclei", "Nuclei Scanner"),
        (r"(?i)dirbuster|gobuster", "Directory Brute Forcer"),
    ]
});

/// Scriptable HTTP clients and browser automation
static AUTOMATION_PATTERNS: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        (r"(?i)^curl/|\bcurl\b", "Curl"),
        (r"(?i)wget", "Wget"),
        (r"(?i)python-requests|python-urllib|aiohttp|httpx|\bpython\b", "Python"),
        (r"(?i)libwww-perl", "Perl LWP"),
        (r"(?i)go-http-client", "Go HTTP Client"),
        (r"(?i)^java/|okhttp|apache-httpclient", "Java HTTP Client"),
        (r"(?i)node-fetch|axios", "Node HTTP Client"),
        (r"(?i)headlesschrome|headless", "Headless Browser"),
        (r"(?i)phantomjs", "PhantomJS"),
        (r"(?i)selenium|webdriver", "Selenium"),
        (r"(?i)puppeteer", "Puppeteer"),
        (r"(?i)playwright", "Playwright"),
    ]
});

/// Compiled signature tables
pub struct UserAgentSignatures {
    bots: Vec<(Regex, String)>,
    automation: Vec<(Regex, String)>,
}

impl UserAgentSignatures {
    /// Compile the signature tables
    pub fn new() -> Self {
        Self {
            bots: compile(BOT_PATTERNS.as_slice()),
            automation: compile(AUTOMATION_PATTERNS.as_slice()),
        }
    }

    /// Classify a User-Agent string
    pub fn classify(&self, user_agent: &str) -> UserAgentClass {
        let first_match = |table: &[(Regex, String)]| {
            table
                .iter()
                .find(|(pattern, _)| pattern.is_match(user_agent))
                .map(|(_, name)| name.clone())
        };

        UserAgentClass {
            bot: first_match(self.bots.as_slice()),
            automation_tool: first_match(self.automation.as_slice()),
        }
    }
}

fn compile(patterns: &[(&str, &str)]) -> Vec<(Regex, String)> {
    patterns
        .iter()
        .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|r| (r, name.to_string())))
        .collect()
}

impl Default for UserAgentSignatures {
    fn default() -> Self {
        Self::new()
    }
}
