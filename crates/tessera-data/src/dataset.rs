//! Reading dataset sources and shaping their records into training samples.

use crate::chat_templates::{ChatTemplate, Message};
use crate::convert::TabularToJsonlConverter;
use arrow::array::{Array as ArrowArray, BooleanArray, StringArray};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tessera_core::{is_tabular_path, Result, RlType, TesseraError};

/// A formatted supervised sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSample {
    /// The full text to train on.
    pub text: String,
    /// Prompt portion (the part before the response), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// A preference sample for reinforcement-learning style training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceSample {
    /// A prompt with a preferred and a dispreferred completion.
    Pairwise {
        /// Prompt text.
        prompt: String,
        /// Preferred completion.
        chosen: String,
        /// Dispreferred completion.
        rejected: String,
    },
    /// A single completion labelled desirable or not.
    Unpaired {
        /// Prompt text.
        prompt: String,
        /// Completion text.
        completion: String,
        /// Whether the completion is desirable.
        label: bool,
    },
}

#[derive(Debug, Deserialize)]
struct AlpacaFormat {
    instruction: String,
    #[serde(default)]
    input: String,
    output: String,
}

#[derive(Debug, Deserialize)]
struct SimpleFormat {
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesFormat {
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ShareGptMessage {
    from: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ShareGptFormat {
    conversations: Vec<ShareGptMessage>,
}

#[derive(Debug, Deserialize)]
struct InputOutputFormat {
    prompt: String,
    response: String,
}

#[derive(Debug, Deserialize)]
struct PairwiseFormat {
    prompt: String,
    chosen: String,
    rejected: String,
}

#[derive(Debug, Deserialize)]
struct UnpairedFormat {
    prompt: String,
    completion: String,
    label: Value,
}

/// Dataset format variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Simple format: {"text": "..."}
    Simple,
    /// Alpaca format: {"instruction": "...", "input": "...", "output": "..."}
    Alpaca,
    /// ShareGPT format: {"conversations": [{"from": "human", "value": "..."}, ...]}
    ShareGpt,
    /// OpenAI format: {"messages": [{"role": "user", "content": "..."}, ...]}
    OpenAi,
    /// Prompt/response pairs: {"prompt": "...", "response": "..."}
    InputOutput,
    /// Auto-detect format from the first record
    Auto,
}

impl DatasetFormat {
    /// Map a descriptor `type` hint to a format.
    pub fn from_hint(hint: &str) -> Result<Self> {
        match hint {
            "completion" | "text" => Ok(Self::Simple),
            "alpaca" => Ok(Self::Alpaca),
            "sharegpt" => Ok(Self::ShareGpt),
            "chat_template" | "messages" | "openai" => Ok(Self::OpenAi),
            "input_output" | "prompt_response" => Ok(Self::InputOutput),
            other => Err(TesseraError::DatasetMaterialization(format!(
                "unknown dataset type `{}`",
                other
            ))),
        }
    }

    /// Detect the format from a record's fields.
    pub fn detect(record: &Value) -> Result<Self> {
        if record.get("text").is_some() {
            Ok(Self::Simple)
        } else if record.get("instruction").is_some() {
            Ok(Self::Alpaca)
        } else if record.get("conversations").is_some() {
            Ok(Self::ShareGpt)
        } else if record.get("messages").is_some() {
            Ok(Self::OpenAi)
        } else if record.get("prompt").is_some() && record.get("response").is_some() {
            Ok(Self::InputOutput)
        } else {
            Err(TesseraError::DatasetMaterialization(
                "could not detect dataset format; expected 'text', 'instruction', \
                 'conversations', 'messages', or 'prompt'/'response' fields"
                    .into(),
            ))
        }
    }
}

/// Read every record of a local dataset file as a JSON value.
///
/// Supports `.jsonl`, `.json` (an array or one object per line), delimited
/// tabular files and `.parquet`. Tabular rows are read through `converter`.
pub fn read_records(path: &Path, converter: &TabularToJsonlConverter) -> Result<Vec<Value>> {
    if !path.is_file() {
        return Err(TesseraError::DatasetMaterialization(format!(
            "dataset file not found: {}",
            path.display()
        )));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "jsonl" => read_jsonl(path),
        "json" => read_json(path),
        "parquet" => read_parquet(path),
        _ if is_tabular_path(path) => read_tabular(path, converter),
        _ => Err(TesseraError::DatasetMaterialization(format!(
            "unsupported dataset file type: {}",
            path.display()
        ))),
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut records = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            TesseraError::DatasetMaterialization(format!(
                "{}: failed to read line {}: {}",
                path.display(),
                line_num + 1,
                e
            ))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| {
            TesseraError::DatasetMaterialization(format!(
                "{}: line {}: {}",
                path.display(),
                line_num + 1,
                e
            ))
        })?;
        records.push(value);
    }
    Ok(records)
}

fn read_json(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path).map_err(|e| open_error(path, e))?;
    if !content.trim_start().starts_with('[') {
        return read_jsonl(path);
    }
    serde_json::from_str(&content).map_err(|e| {
        TesseraError::DatasetMaterialization(format!("{}: {}", path.display(), e))
    })
}

fn read_tabular(path: &Path, converter: &TabularToJsonlConverter) -> Result<Vec<Value>> {
    converter
        .records(path)?
        .map(|record| record.map(|r| r.into_json()))
        .collect()
}

/// Read string and boolean columns of a Parquet file into JSON objects.
///
/// Null cells are omitted from the record; other column types are skipped.
fn read_parquet(path: &Path) -> Result<Vec<Value>> {
    let parquet_error = |what: &str, e: &dyn std::fmt::Display| {
        TesseraError::DatasetMaterialization(format!("{}: {}: {}", path.display(), what, e))
    };

    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| parquet_error("failed to create Parquet reader", &e))?
        .build()
        .map_err(|e| parquet_error("failed to build Parquet reader", &e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| parquet_error("failed to read Parquet batch", &e))?;
        let schema = batch.schema();
        let mut rows = vec![Map::new(); batch.num_rows()];

        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if let Some(strings) = column.as_any().downcast_ref::<StringArray>() {
                for (i, row) in rows.iter_mut().enumerate() {
                    if !strings.is_null(i) {
                        row.insert(field.name().clone(), Value::from(strings.value(i)));
                    }
                }
            } else if let Some(bools) = column.as_any().downcast_ref::<BooleanArray>() {
                for (i, row) in rows.iter_mut().enumerate() {
                    if !bools.is_null(i) {
                        row.insert(field.name().clone(), Value::from(bools.value(i)));
                    }
                }
            } else {
                tracing::debug!(
                    column = %field.name(),
                    data_type = %field.data_type(),
                    "Skipping non-text Parquet column"
                );
            }
        }
        records.extend(rows.into_iter().map(Value::Object));
    }
    Ok(records)
}

fn open_error(path: &Path, e: std::io::Error) -> TesseraError {
    TesseraError::DatasetMaterialization(format!("failed to open {}: {}", path.display(), e))
}

/// Shape raw records into supervised text samples.
///
/// `format` is resolved from the first record when it is [`DatasetFormat::Auto`].
/// Conversations are laid out by `template` when given, otherwise as plain
/// `Role: content` turns.
pub fn to_text_samples(
    records: Vec<Value>,
    format: DatasetFormat,
    template: Option<&ChatTemplate>,
) -> Result<Vec<TextSample>> {
    let format = match (format, records.first()) {
        (DatasetFormat::Auto, Some(first)) => DatasetFormat::detect(first)?,
        (format, _) => format,
    };

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            parse_record(record, format, template).map_err(|e| match e {
                TesseraError::DatasetMaterialization(msg) => {
                    TesseraError::DatasetMaterialization(format!("record {}: {}", i + 1, msg))
                }
                other => other,
            })
        })
        .collect()
}

fn parse_record(
    record: Value,
    format: DatasetFormat,
    template: Option<&ChatTemplate>,
) -> Result<TextSample> {
    match format {
        DatasetFormat::Simple => {
            let parsed: SimpleFormat = from_record(record)?;
            Ok(TextSample {
                text: parsed.text,
                prompt: None,
            })
        }
        DatasetFormat::Alpaca => {
            let parsed: AlpacaFormat = from_record(record)?;
            let prompt = if parsed.input.is_empty() {
                format!("### Instruction:\n{}\n\n### Response:\n", parsed.instruction)
            } else {
                format!(
                    "### Instruction:\n{}\n\n### Input:\n{}\n\n### Response:\n",
                    parsed.instruction, parsed.input
                )
            };
            Ok(TextSample {
                text: format!("{}{}", prompt, parsed.output),
                prompt: Some(prompt),
            })
        }
        DatasetFormat::ShareGpt => {
            let parsed: ShareGptFormat = from_record(record)?;
            let messages = parsed
                .conversations
                .into_iter()
                .map(|m| {
                    let role = match m.from.as_str() {
                        "human" | "user" => "user",
                        "gpt" | "assistant" => "assistant",
                        other => other,
                    };
                    Message::new(role, m.value)
                })
                .collect();
            Ok(format_conversation(messages, template))
        }
        DatasetFormat::OpenAi => {
            let parsed: MessagesFormat = from_record(record)?;
            let messages = parsed
                .messages
                .into_iter()
                .map(|m| Message::new(m.role, m.content))
                .collect();
            Ok(format_conversation(messages, template))
        }
        DatasetFormat::InputOutput => {
            let parsed: InputOutputFormat = from_record(record)?;
            Ok(format_conversation(
                vec![Message::user(parsed.prompt), Message::assistant(parsed.response)],
                template,
            ))
        }
        DatasetFormat::Auto => Err(TesseraError::DatasetMaterialization(
            "dataset format was not resolved".into(),
        )),
    }
}

fn format_conversation(messages: Vec<Message>, template: Option<&ChatTemplate>) -> TextSample {
    if let Some(tmpl) = template {
        let formatted = tmpl.apply(&messages);
        let prompt = formatted.prompt().to_string();
        return TextSample {
            text: formatted.text,
            prompt: Some(prompt),
        };
    }

    let mut text = String::new();
    let mut prompt_end = 0;
    for msg in &messages {
        let role = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "system" => "System",
            other => other,
        };
        text.push_str(&format!("{}: {}\n\n", role, msg.content));
        if msg.role != "assistant" {
            prompt_end = text.len();
        }
    }

    TextSample {
        prompt: (prompt_end > 0).then(|| text[..prompt_end].to_string()),
        text,
    }
}

/// Shape raw records into preference samples for `rl`.
pub fn to_preference_samples(records: Vec<Value>, rl: RlType) -> Result<Vec<PreferenceSample>> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            parse_preference(record, rl).map_err(|e| {
                TesseraError::DatasetMaterialization(format!("record {}: {}", i + 1, e))
            })
        })
        .collect()
}

fn parse_preference(record: Value, rl: RlType) -> std::result::Result<PreferenceSample, String> {
    if rl.is_pairwise() {
        let parsed: PairwiseFormat = serde_json::from_value(record).map_err(|e| e.to_string())?;
        return Ok(PreferenceSample::Pairwise {
            prompt: parsed.prompt,
            chosen: parsed.chosen,
            rejected: parsed.rejected,
        });
    }

    let parsed: UnpairedFormat = serde_json::from_value(record).map_err(|e| e.to_string())?;
    let label = match &parsed.label {
        Value::Bool(b) => *b,
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(format!("label `{}` is not a boolean", s)),
        },
        Value::Number(n) if n.as_u64() == Some(1) => true,
        Value::Number(n) if n.as_u64() == Some(0) => false,
        other => return Err(format!("label `{}` is not a boolean", other)),
    };
    Ok(PreferenceSample::Unpaired {
        prompt: parsed.prompt,
        completion: parsed.completion,
        label,
    })
}

fn from_record<T: serde::de::DeserializeOwned>(record: Value) -> Result<T> {
    serde_json::from_value(record).map_err(|e| TesseraError::DatasetMaterialization(e.to_string()))
}
