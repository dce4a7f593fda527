use std::sync::LazyLock;

use regex_lite::Regex;
use regex_lite::RegexBuilder;

/// Terms that mark a post as stock-market talk.
pub const STOCK_MARKET_TERMS: &[&str] = &[
    "stock",
    "stocks",
    "equity",
    "equities",
    "invest",
    "investment",
    "investing",
    "buy",
    "sell",
    "bull",
    "bear",
    "market",
    "ticker",
    "finance",
    "trading",
    "portfolio",
    "nasdaq",
    "nyse",
    "dow",
    "s&p",
    "earnings",
    "ipo",
    "dividend",
    "split",
    "buyback",
    "analyst",
    "upgrade",
    "downgrade",
    "quarterly",
    "profit",
    "loss",
    "option",
    "call",
    "put",
    "crypto",
    "bitcoin",
    "eth",
    "wallstreet",
    "wall street",
    "stock market",
    "shares",
    "shareholder",
    "BTC",
    "AAPL",
    "Apple",
    "NVIDIA",
    "NVDA",
];

#[expect(clippy::expect_used)]
static STOCK_MARKET: LazyLock<TopicFilter> = LazyLock::new(|| {
    TopicFilter::new(STOCK_MARKET_TERMS).expect("stock vocabulary compiles")
});

/// Whole-word, case-insensitive vocabulary match.
///
/// Every term is escaped, so `s&p` or `c++` match literally. Matching is
/// anchored on word boundaries on both sides: `cat` does not match
/// `category`. The filter holds no mutable state and can be shared freely
/// across tasks.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    /// `None` for an empty vocabulary, which matches nothing.
    pattern: Option<Regex>,
    terms: Vec<String>,
}

impl TopicFilter {
    pub fn new<I, S>(terms: I) -> Result<Self, regex_lite::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Self {
                pattern: None,
                terms,
            });
        }

        let alternation = terms
            .iter()
            .map(|term| regex_lite::escape(term))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
            terms,
        })
    }

    /// The built-in stock-market vocabulary.
    pub fn stock_market() -> Self {
        STOCK_MARKET.clone()
    }

    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}
