use crate::config::file::{ExtractConfig, FieldConfig};
use crate::domain::model::Target;
use crate::domain::ports::RenderedPage;
use crate::utils::error::{MonitorError, Result};
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 同一欄位有多個命中時如何取值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    First,
    Max,
}

const MAIN_PAGE: &str = "main";

#[derive(Debug, Clone)]
pub struct PageTemplate {
    pub name: String,
    pub url: String,
}

impl PageTemplate {
    fn needs_company(&self) -> bool {
        self.url.contains("{company_url}") || self.url.contains("{company_id}")
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Patterns(Vec<Regex>),
    // Selector 在抽取時才解析，規則本身保持 Send + Sync
    Css {
        selector: String,
        attribute: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    name: String,
    page: String,
    matcher: Matcher,
    aggregate: Aggregate,
    numeric: bool,
    empty: Option<(Regex, String)>,
    default: Option<String>,
    required: bool,
}

#[derive(Debug, Clone)]
pub struct DerivedRule {
    name: String,
    any_positive: Vec<String>,
    yes: String,
    no: String,
}

/// 將渲染後頁面轉成欄位；規則全部來自設定
#[derive(Debug, Clone)]
pub struct Extractor {
    pages: Vec<PageTemplate>,
    fields: Vec<FieldRule>,
    derived: Vec<DerivedRule>,
}

/// 已代入網址的待抓頁面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPage {
    pub name: String,
    pub url: String,
}

fn compile_pattern(field: &str, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| MonitorError::InvalidConfigValueError {
            field: format!("extract.fields.{}", field),
            value: pattern.to_string(),
            reason: format!("Invalid regex: {}", e),
        })
}

impl FieldRule {
    fn from_config(config: &FieldConfig, default_page: &str, pages: &[PageTemplate]) -> Result<Self> {
        let page = config
            .page
            .clone()
            .unwrap_or_else(|| default_page.to_string());
        if !pages.iter().any(|p| p.name == page) {
            return Err(MonitorError::InvalidConfigValueError {
                field: format!("extract.fields.{}.page", config.name),
                value: page,
                reason: "No page template with this name".to_string(),
            });
        }

        let matcher = match (&config.selector, config.patterns.is_empty()) {
            (Some(selector), true) => {
                Selector::parse(selector).map_err(|e| MonitorError::InvalidConfigValueError {
                    field: format!("extract.fields.{}.selector", config.name),
                    value: selector.clone(),
                    reason: format!("Invalid CSS selector: {}", e),
                })?;
                Matcher::Css {
                    selector: selector.clone(),
                    attribute: config.attribute.clone(),
                }
            }
            (None, false) => Matcher::Patterns(
                config
                    .patterns
                    .iter()
                    .map(|p| compile_pattern(&config.name, p))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => {
                return Err(MonitorError::InvalidConfigValueError {
                    field: format!("extract.fields.{}", config.name),
                    value: config.name.clone(),
                    reason: "Exactly one of `patterns` or `selector` must be set".to_string(),
                })
            }
        };

        let empty = match &config.empty_pattern {
            Some(pattern) => Some((
                compile_pattern(&config.name, pattern)?,
                config.empty_value.clone().unwrap_or_default(),
            )),
            None => None,
        };

        Ok(Self {
            name: config.name.clone(),
            page,
            matcher,
            aggregate: config.aggregate,
            numeric: config.numeric,
            empty,
            default: config.default.clone(),
            required: config.required,
        })
    }

    fn apply(&self, doc: &Html, text: &str) -> Option<String> {
        let candidates: Vec<String> = match &self.matcher {
            Matcher::Patterns(patterns) => {
                let mut found = Vec::new();
                for re in patterns {
                    for caps in re.captures_iter(text) {
                        let m = caps.get(1).or_else(|| caps.get(0));
                        if let Some(m) = m {
                            found.push(m.as_str().trim().to_string());
                        }
                    }
                    // 第一個命中的樣式就決定結果；max 只在該樣式的結果中取最大
                    if !found.is_empty() {
                        break;
                    }
                }
                found
            }
            Matcher::Css {
                selector,
                attribute,
            } => {
                let Ok(selector) = Selector::parse(selector) else {
                    return None;
                };
                doc.select(&selector)
                    .filter_map(|el| match attribute {
                        Some(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
                        None => Some(collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))),
                    })
                    .filter(|v| !v.is_empty())
                    .collect()
            }
        };

        let values: Vec<String> = if self.numeric {
            candidates.iter().filter_map(|c| parse_count(c)).map(|n| n.to_string()).collect()
        } else {
            candidates
        };

        match self.aggregate {
            Aggregate::First => values.into_iter().next(),
            Aggregate::Max => {
                if self.numeric {
                    values
                        .iter()
                        .filter_map(|v| v.parse::<u64>().ok())
                        .max()
                        .map(|n| n.to_string())
                } else {
                    values.into_iter().max()
                }
            }
        }
    }
}

impl Extractor {
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        let pages: Vec<PageTemplate> = if config.pages.is_empty() {
            vec![PageTemplate {
                name: MAIN_PAGE.to_string(),
                url: "{url}".to_string(),
            }]
        } else {
            config
                .pages
                .iter()
                .map(|p| PageTemplate {
                    name: p.name.clone(),
                    url: p.url.clone(),
                })
                .collect()
        };

        if config.fields.is_empty() {
            return Err(MonitorError::MissingConfigError {
                field: "extract.fields".to_string(),
            });
        }

        let default_page = pages[0].name.clone();
        let fields = config
            .fields
            .iter()
            .map(|f| FieldRule::from_config(f, &default_page, &pages))
            .collect::<Result<Vec<_>>>()?;

        let derived = config
            .derived
            .iter()
            .map(|d| {
                if let Some(unknown) = d
                    .any_positive
                    .iter()
                    .find(|name| !fields.iter().any(|f| &f.name == *name))
                {
                    return Err(MonitorError::InvalidConfigValueError {
                        field: format!("extract.derived.{}", d.name),
                        value: unknown.clone(),
                        reason: "Refers to an unknown field".to_string(),
                    });
                }
                Ok(DerivedRule {
                    name: d.name.clone(),
                    any_positive: d.any_positive.clone(),
                    yes: d.yes.clone(),
                    no: d.no.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pages,
            fields,
            derived,
        })
    }

    /// 輸出欄位名稱（抽取欄位在前，衍生欄位在後）
    pub fn field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.name.clone())
            .chain(self.derived.iter().map(|d| d.name.clone()))
            .collect()
    }

    /// 是否需要先由個人頁找出公司
    pub fn needs_company(&self) -> bool {
        self.pages.iter().any(PageTemplate::needs_company)
    }

    /// 代入 `{url}` `{id}` `{company_url}` `{company_id}`
    pub fn pages_for(&self, target: &Target, company: Option<&Target>) -> Result<Vec<PlannedPage>> {
        self.pages
            .iter()
            .map(|page| {
                let mut url = page
                    .url
                    .replace("{url}", target.url())
                    .replace("{id}", target.id().unwrap_or_default());

                if page.needs_company() {
                    let company = company.ok_or_else(|| {
                        MonitorError::extraction(
                            target.url(),
                            format!("page '{}' needs a company but none was resolved", page.name),
                        )
                    })?;
                    let company_id = company.id().unwrap_or_default();
                    // 廣告庫只接受數字 ID，別名查不到結果會被誤判成沒有廣告
                    if page.url.contains("{company_id}")
                        && (company_id.is_empty() || !company_id.bytes().all(|b| b.is_ascii_digit()))
                    {
                        return Err(MonitorError::extraction(
                            target.url(),
                            format!(
                                "page '{}' needs a numeric company id but {} has '{}'",
                                page.name,
                                company.url(),
                                company_id
                            ),
                        ));
                    }
                    url = url
                        .replace("{company_url}", company.url())
                        .replace("{company_id}", company_id);
                }

                Ok(PlannedPage {
                    name: page.name.clone(),
                    url,
                })
            })
            .collect()
    }

    /// `pages` 以頁面名稱對應渲染結果
    pub fn extract(
        &self,
        target: &Target,
        pages: &HashMap<String, RenderedPage>,
    ) -> Result<BTreeMap<String, String>> {
        let parsed: HashMap<&str, (Html, String)> = pages
            .iter()
            .map(|(name, page)| {
                let doc = Html::parse_document(&page.html);
                let text = collapse_whitespace(&doc.root_element().text().collect::<Vec<_>>().join(" "));
                (name.as_str(), (doc, text))
            })
            .collect();

        let mut fields = BTreeMap::new();

        for rule in &self.fields {
            let (doc, text) = parsed.get(rule.page.as_str()).ok_or_else(|| {
                MonitorError::extraction(target.url(), format!("page '{}' was not fetched", rule.page))
            })?;

            let value = rule
                .apply(doc, text)
                .or_else(|| {
                    rule.empty
                        .as_ref()
                        .filter(|(re, _)| re.is_match(text))
                        .map(|(_, v)| v.clone())
                })
                .or_else(|| rule.default.clone());

            match value {
                Some(v) => {
                    fields.insert(rule.name.clone(), v);
                }
                None if rule.required => {
                    return Err(MonitorError::extraction(
                        target.url(),
                        format!("required field '{}' not found", rule.name),
                    ));
                }
                None => {
                    tracing::debug!("Optional field '{}' not found for {}", rule.name, target);
                }
            }
        }

        for rule in &self.derived {
            let positive = rule.any_positive.iter().any(|name| {
                fields
                    .get(name)
                    .and_then(|v| v.replace(',', "").parse::<f64>().ok())
                    .is_some_and(|n| n > 0.0)
            });
            let value = if positive { &rule.yes } else { &rule.no };
            fields.insert(rule.name.clone(), value.clone());
        }

        Ok(fields)
    }
}

/// "1,234" → 1234
fn parse_count(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    digits.parse().ok()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
