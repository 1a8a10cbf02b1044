//! Built-in knowledge worker and keyword extraction for knowledge queries.

use crate::state::worker::QueryRequest;
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

const MAX_SCANNED_FILE_BYTES: u64 = 1024 * 1024;
const MATCH_WINDOW_BYTES: u64 = 50 * 1024;
const READ_LIMIT_BYTES: u64 = 500 * 1024;
const EXCERPT_CHARS: usize = 10_000;
const MAX_RESULTS: usize = 20;
pub const MAX_KEYWORDS: usize = 10;

const VOCABULARY: &[&str] = &[
    "memory",
    "heap",
    "subprocess",
    "process",
    "isolation",
    "crash",
    "knowledge",
    "query",
    "waypoint",
    "agent",
    "methodology",
    "authentication",
    "auth",
    "security",
    "writing",
    "dependency",
];

/// Topic keywords for a free-form prompt, in discovery order.
pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let lower = prompt.to_lowercase();
    let mut found: Vec<String> = VOCABULARY
        .iter()
        .filter(|word| lower.contains(*word))
        .map(|word| word.to_string())
        .collect();

    found.extend(
        prompt
            .split('"')
            .skip(1)
            .step_by(2)
            .map(str::trim)
            .filter(|phrase| !phrase.is_empty())
            .map(str::to_string),
    );

    found.extend(
        prompt
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .map(|token| token.trim_matches(|c| c == '-' || c == '_'))
            .filter(|token| token.len() > 3)
            .filter(|token| token.contains(['-', '_']))
            .filter(|token| token.starts_with(|c: char| c.is_ascii_alphabetic()))
            .map(str::to_string),
    );

    let mut unique = Vec::new();
    for keyword in found {
        if !unique.contains(&keyword) {
            unique.push(keyword);
        }
        if unique.len() == MAX_KEYWORDS {
            break;
        }
    }
    unique
}

fn gather_candidates(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            gather_candidates(&path, out);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let scanned = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("json"));
        let small = entry
            .metadata()
            .is_ok_and(|meta| meta.len() < MAX_SCANNED_FILE_BYTES);
        if scanned && small {
            out.push(path);
        }
    }
}

fn read_prefix(path: &Path, limit: u64) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut buf = Vec::new();
    file.take(limit).read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn is_relevant(docs_dir: &Path, path: &Path, keywords: &[String]) -> bool {
    let name = path
        .strip_prefix(docs_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .to_lowercase();
    if keywords.iter().any(|kw| name.contains(&kw.to_lowercase())) {
        return true;
    }
    read_prefix(path, MATCH_WINDOW_BYTES).is_some_and(|sample| {
        let sample = sample.to_lowercase();
        keywords.iter().any(|kw| sample.contains(&kw.to_lowercase()))
    })
}

/// Scan `docs_dir` for files mentioning any requested keyword.
pub fn scan(docs_dir: &Path, request: &QueryRequest) -> Value {
    let mut candidates = Vec::new();
    gather_candidates(docs_dir, &mut candidates);
    candidates.sort();

    let mut analysis = Map::new();
    for path in candidates
        .into_iter()
        .filter(|path| is_relevant(docs_dir, path, &request.keywords))
        .take(MAX_RESULTS)
    {
        let Some(content) = read_prefix(&path, READ_LIMIT_BYTES) else {
            continue;
        };
        let lower = content.to_lowercase();
        let keywords_found: Vec<&String> = request
            .keywords
            .iter()
            .filter(|kw| lower.contains(&kw.to_lowercase()))
            .collect();
        let excerpt: String = content.chars().take(EXCERPT_CHARS).collect();
        analysis.insert(
            path.display().to_string(),
            json!({
                "content": excerpt,
                "size": content.len(),
                "keywords_found": keywords_found,
            }),
        );
    }

    json!({
        "task_description": request.description,
        "keywords": request.keywords,
        "docs_analysis": analysis,
        "status": "success",
    })
}

pub fn scan_request_file(docs_dir: &Path, request_path: &Path) -> Result<Value> {
    let raw = fs::read(request_path)
        .with_context(|| format!("failed to read query request {}", request_path.display()))?;
    let request: QueryRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("invalid query request {}", request_path.display()))?;
    Ok(scan(docs_dir, &request))
}

#[cfg(test)]
mod tests {
    use super::{MAX_KEYWORDS, extract_keywords, scan, scan_request_file};
    use crate::state::worker::QueryRequest;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn keywords_come_from_vocabulary_quotes_and_terms() {
        let keywords =
            extract_keywords(r#"Check the auth flow in "session store" and token-refresh logic"#);
        assert_eq!(
            keywords,
            vec![
                "auth".to_string(),
                "session store".to_string(),
                "token-refresh".to_string()
            ]
        );
    }

    #[test]
    fn short_or_plain_terms_are_skipped() {
        assert!(extract_keywords("fix a-b and plain words").is_empty());
        assert_eq!(extract_keywords("look at snake_case_name"), vec!["snake_case_name"]);
    }

    #[test]
    fn keywords_are_deduplicated_and_capped() {
        let prompt = (0..20)
            .map(|i| format!("term-{i:02} term-{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let keywords = extract_keywords(&prompt);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "term-00");
        assert_eq!(keywords[1], "term-01");
    }

    #[test]
    fn scan_reports_matching_docs_only() {
        let tmp = tempdir().expect("tempdir");
        let docs = tmp.path().join("docs");
        fs::create_dir_all(docs.join("nested")).expect("mkdir");
        fs::write(docs.join("auth.md"), "# Auth\nlogin notes").expect("write");
        fs::write(docs.join("nested/flows.json"), r#"{"flow":"uses JWT"}"#).expect("write");
        fs::write(docs.join("unrelated.md"), "nothing here").expect("write");
        fs::write(docs.join("jwt.txt"), "jwt but wrong extension").expect("write");

        let request = QueryRequest::new("auth", &["auth".to_string(), "jwt".to_string()]);
        let result = scan(&docs, &request);
        assert_eq!(result["status"], "success");
        let analysis = result["docs_analysis"].as_object().expect("analysis");
        assert_eq!(analysis.len(), 2);

        let auth = analysis
            .iter()
            .find(|(path, _)| path.ends_with("auth.md"))
            .map(|(_, v)| v)
            .expect("auth.md present");
        assert_eq!(auth["keywords_found"][0], "auth");
        assert_eq!(auth["size"], 18);
    }

    #[test]
    fn long_content_is_excerpted() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("big.md"), format!("auth {}", "x".repeat(20_000)))
            .expect("write");
        let result = scan(tmp.path(), &QueryRequest::new("q", &["auth".to_string()]));
        let entry = result["docs_analysis"]
            .as_object()
            .and_then(|map| map.values().next())
            .expect("entry");
        assert_eq!(entry["content"].as_str().expect("content").len(), 10_000);
        assert_eq!(entry["size"], 20_005);
    }

    #[test]
    fn missing_docs_dir_is_an_empty_success() {
        let tmp = tempdir().expect("tempdir");
        let result = scan(
            &tmp.path().join("nope"),
            &QueryRequest::new("q", &["auth".to_string()]),
        );
        assert_eq!(result["status"], "success");
        assert!(result["docs_analysis"].as_object().expect("map").is_empty());
    }

    #[test]
    fn request_file_round_trip() {
        let tmp = tempdir().expect("tempdir");
        let request_path = tmp.path().join("req.json");
        fs::write(
            &request_path,
            r#"{"description":"d","keywords":["auth"]}"#,
        )
        .expect("write");
        let result = scan_request_file(tmp.path(), &request_path).expect("scan");
        assert_eq!(result["task_description"], "d");
        assert!(scan_request_file(tmp.path(), &tmp.path().join("missing.json")).is_err());
    }
}
