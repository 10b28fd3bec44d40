//! Batch request assembly.
//!
//! Builds one addressable request line per applicable (category, chunk)
//! pair and serializes the set as JSONL, the provider's batch input
//! format: one complete JSON object per line, no enclosing array.

use crate::address::RequestAddress;
use crate::categories::{applicable_categories, SYSTEM_PROMPT};
use crate::config::BatchConfig;
use crate::models::Chunk;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One line of the provider's batch input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_completion_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Build the request lines for one document's chunks, ordered by
/// category then chunk index. A document whose prefix routes to no
/// category yields an empty set.
pub fn build_requests(
    project: &str,
    document: &str,
    chunks: &[Chunk],
    config: &BatchConfig,
) -> Result<Vec<BatchRequestLine>> {
    let categories = applicable_categories(document);
    let mut lines = Vec::with_capacity(categories.len() * chunks.len());

    for category in categories {
        for chunk in chunks {
            let address = RequestAddress {
                project: project.to_string(),
                document: document.to_string(),
                category,
                chunk_index: chunk.index,
            };
            lines.push(BatchRequestLine {
                custom_id: address.encode()?,
                method: "POST".to_string(),
                url: "/chat/completions".to_string(),
                body: RequestBody {
                    model: config.model.clone(),
                    messages: vec![
                        Message {
                            role: "system".to_string(),
                            content: SYSTEM_PROMPT.to_string(),
                        },
                        Message {
                            role: "user".to_string(),
                            content: format!(
                                "{}\n\nDocumento:\n{}",
                                category.prompt(),
                                chunk.text
                            ),
                        },
                    ],
                    max_completion_tokens: config.max_completion_tokens,
                    temperature: config.temperature,
                },
            });
        }
    }
    Ok(lines)
}

/// Serialize request lines as JSONL.
pub fn to_jsonl(lines: &[BatchRequestLine]) -> Result<String> {
    let mut out = String::new();
    for line in lines {
        out.push_str(&serde_json::to_string(line)?);
        out.push('\n');
    }
    Ok(out)
}
