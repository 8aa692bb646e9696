//! Report generation and rendering.
//!
//! The builder asks the model for a titled, sectioned report over the
//! synthesized findings, then rebuilds the references section itself from
//! the URLs that actually contributed, since models invent citations. If
//! the model's structure is unusable the report is
//! assembled deterministically from the syntheses instead.
//!
//! Rendering targets markdown and a self-contained HTML page; artifacts
//! are written under the configured output directory with unique names.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::llm::{self, LlmClient};
use crate::models::{
    QueryAnalysis, ReportSection, ResearchReport, SectionType, SubTopicSynthesis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Html,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "html" => Ok(ReportFormat::Html),
            other => anyhow::bail!("Unknown report format: '{}'. Must be markdown or html.", other),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
        }
    }
}

pub struct ReportBuilder {
    llm: Arc<dyn LlmClient>,
}

impl ReportBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn build(
        &self,
        analysis: &QueryAnalysis,
        syntheses: &[SubTopicSynthesis],
    ) -> ResearchReport {
        let query = &analysis.original_query;
        let material: String = syntheses
            .iter()
            .map(|s| {
                format!(
                    "Sub-topic: {}\nSummary: {}\nAgreed: {}\nDisputed: {}",
                    s.sub_topic,
                    s.summary,
                    s.consistent_findings.join("; "),
                    s.conflicting_findings.join("; ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Research question: {}\n\nSynthesized findings:\n{}\n\n\
             Write a structured research report. Respond with JSON only:\n\
             {{\"title\": \"...\", \"sections\": [{{\"title\": \"...\", \"type\": \
             \"introduction\"|\"body\"|\"conclusion\", \"content\": \"...\"}}]}}\n\
             Do not include a references section; it is added separately.",
            query, material
        );

        let mut report = match self
            .llm
            .chat(&prompt, Some("You write research reports. Respond with JSON only."))
            .await
        {
            Ok(response) => match llm::parse_json_response(&response) {
                Ok(value) => parse_report(query, analysis, &value)
                    .unwrap_or_else(|| assemble_report(analysis, syntheses)),
                Err(e) => {
                    tracing::warn!(error = %e, "report response unparseable, assembling directly");
                    assemble_report(analysis, syntheses)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "report call failed, assembling directly");
                assemble_report(analysis, syntheses)
            }
        };

        // References always come from the pipeline's own records.
        report
            .sections
            .retain(|s| s.section_type != SectionType::References);
        report.sections.push(references_section(syntheses));
        report
    }
}

fn parse_report(
    query: &str,
    analysis: &QueryAnalysis,
    value: &serde_json::Value,
) -> Option<ResearchReport> {
    let title = value.get("title")?.as_str()?.trim().to_string();
    let raw_sections = value.get("sections")?.as_array()?;

    let mut sections = Vec::new();
    for raw in raw_sections {
        let Some(content) = raw.get("content").and_then(|c| c.as_str()) else {
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }
        let section_type = match raw.get("type").and_then(|t| t.as_str()) {
            Some("introduction") => SectionType::Introduction,
            Some("conclusion") => SectionType::Conclusion,
            Some("references") => SectionType::References,
            _ => SectionType::Body,
        };
        sections.push(ReportSection {
            title: raw
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("Untitled")
                .to_string(),
            section_type,
            content: content.to_string(),
        });
    }

    if title.is_empty() || sections.is_empty() {
        return None;
    }

    Some(ResearchReport {
        title,
        query: query.to_string(),
        sections,
        analysis: analysis.clone(),
        generated_at: Utc::now(),
    })
}

/// Deterministic report built straight from the syntheses.
fn assemble_report(analysis: &QueryAnalysis, syntheses: &[SubTopicSynthesis]) -> ResearchReport {
    let query = &analysis.original_query;
    let mut sections = vec![ReportSection {
        title: "Introduction".to_string(),
        section_type: SectionType::Introduction,
        content: format!(
            "This report summarizes findings gathered across {} sub-topic(s) for the question: {}",
            syntheses.len(),
            query
        ),
    }];

    for synthesis in syntheses {
        let mut content = synthesis.summary.clone();
        if !synthesis.consistent_findings.is_empty() {
            content.push_str("\n\nConsistent findings:\n");
            for finding in &synthesis.consistent_findings {
                content.push_str(&format!("- {}\n", finding));
            }
        }
        if !synthesis.conflicting_findings.is_empty() {
            content.push_str("\nConflicting findings:\n");
            for finding in &synthesis.conflicting_findings {
                content.push_str(&format!("- {}\n", finding));
            }
        }
        sections.push(ReportSection {
            title: synthesis.sub_topic.clone(),
            section_type: SectionType::Body,
            content,
        });
    }

    sections.push(ReportSection {
        title: "Conclusion".to_string(),
        section_type: SectionType::Conclusion,
        content: "See the per-topic findings above; source coverage is listed under References."
            .to_string(),
    });

    ResearchReport {
        title: format!("Research Report: {}", query),
        query: query.to_string(),
        sections,
        analysis: analysis.clone(),
        generated_at: Utc::now(),
    }
}

fn references_section(syntheses: &[SubTopicSynthesis]) -> ReportSection {
    let mut seen = std::collections::HashSet::new();
    let urls: Vec<String> = syntheses
        .iter()
        .flat_map(|s| s.source_urls.iter())
        .filter(|u| seen.insert((*u).clone()))
        .cloned()
        .collect();

    let content = if urls.is_empty() {
        "No sources were cited.".to_string()
    } else {
        urls.iter()
            .enumerate()
            .map(|(i, u)| format!("{}. {}", i + 1, u))
            .collect::<Vec<_>>()
            .join("\n")
    };

    ReportSection {
        title: "References".to_string(),
        section_type: SectionType::References,
        content,
    }
}

pub fn render_markdown(report: &ResearchReport) -> String {
    let mut out = format!("# {}\n\n", report.title);
    out.push_str(&format!(
        "*Generated {} for query: {}*\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        report.query
    ));
    for section in &report.sections {
        out.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content));
    }
    out
}

pub fn render_html(report: &ResearchReport) -> String {
    let mut body = String::new();
    for section in &report.sections {
        body.push_str(&format!(
            "    <section>\n      <h2>{}</h2>\n      <p>{}</p>\n    </section>\n",
            escape_html(&section.title),
            escape_html(&section.content).replace('\n', "<br/>")
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <title>{title}</title>
  <style>
    body {{ font-family: Georgia, serif; max-width: 48rem; margin: 2rem auto; line-height: 1.6; color: #222; }}
    h1 {{ border-bottom: 2px solid #444; padding-bottom: 0.3rem; }}
    h2 {{ color: #444; margin-top: 2rem; }}
    .meta {{ color: #777; font-style: italic; }}
  </style>
</head>
<body>
  <h1>{title}</h1>
  <p class="meta">Generated {date} for query: {query}</p>
{body}</body>
</html>
"#,
        title = escape_html(&report.title),
        date = report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        query = escape_html(&report.query),
        body = body
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Write the rendered report under `dir`, returning the path.
pub fn save_report(report: &ResearchReport, format: ReportFormat, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let slug: String = report
        .title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(40)
        .collect();

    let short_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let path = dir.join(format!("{}-{}.{}", slug, short_id, format.extension()));

    let rendered = match format {
        ReportFormat::Markdown => render_markdown(report),
        ReportFormat::Html => render_html(report),
    };
    std::fs::write(&path, rendered)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(path)
}
