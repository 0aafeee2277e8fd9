//! Built-in tools, one per engine operation.
//!
//! Each tool reads its validated JSON parameters, calls the matching
//! [`Engine`](crate::engine::Engine) method and serializes the result.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::engine::SearchRequest;
use crate::error::{Error, Result};
use crate::models::{ItemKind, NewPrompt, PromptChanges};
use crate::traits::{Tool, ToolContext};

/// Every built-in tool, in the order `GET /tools/list` reports them.
pub fn builtin_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(SearchDocsTool),
        Box::new(FindDocumentsTool),
        Box::new(FindCodeReuseTool),
        Box::new(ArchitectureInfoTool),
        Box::new(IndexDocumentationTool),
        Box::new(SearchPromptsTool),
        Box::new(GetPromptTool),
        Box::new(CreatePromptTool),
        Box::new(EditPromptTool),
        Box::new(ResolvePromptTool),
        Box::new(SuggestPromptsTool),
        Box::new(GenerateContextualPromptTool),
        Box::new(ApplyPromptTool),
        Box::new(GetItemTool),
        Box::new(RecordUsageTool),
        Box::new(StatsTool),
    ]
}

// ── Parameter helpers ──────────────────────────────────────────────────

fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params[name]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::validation(format!("{} must not be empty", name)))
}

fn optional_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params[name].as_str().filter(|s| !s.trim().is_empty())
}

fn optional_limit(params: &Value) -> Result<Option<usize>> {
    match &params["limit"] {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::validation("limit must be a non-negative integer")),
    }
}

fn string_list(params: &Value, name: &str) -> Vec<String> {
    params[name]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(params: &Value, name: &str) -> Result<HashMap<String, String>> {
    let Some(obj) = params[name].as_object() else {
        return Ok(HashMap::new());
    };
    obj.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(Error::validation(format!(
                "{}.{} must be a string, got {}",
                name, key, other
            ))),
        })
        .collect()
}

fn limit_schema(default: usize) -> Value {
    json!({ "type": "integer", "description": "Max results", "default": default })
}

// ── Search ─────────────────────────────────────────────────────────────

pub struct SearchDocsTool;

#[async_trait]
impl Tool for SearchDocsTool {
    fn name(&self) -> &str {
        "search_docs"
    }

    fn description(&self) -> &str {
        "Keyword search over indexed documents and code entities"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "kind": { "type": "string", "enum": ["document", "code"], "description": "Restrict to one item kind" },
                "doc_type": { "type": "string", "description": "File extension, e.g. md" },
                "path_prefix": { "type": "string", "description": "Only items under this path" },
                "limit": limit_schema(10)
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let request = SearchRequest {
            kind: optional_str(&params, "kind").map(ItemKind::parse).transpose()?,
            doc_type: optional_str(&params, "doc_type").map(str::to_string),
            path_prefix: optional_str(&params, "path_prefix").map(str::to_string),
            limit: optional_limit(&params)?,
        };
        let results = ctx.engine.search_docs(query, &request)?;
        Ok(json!({ "results": results }))
    }
}

pub struct FindDocumentsTool;

#[async_trait]
impl Tool for FindDocumentsTool {
    fn name(&self) -> &str {
        "find_documents"
    }

    fn description(&self) -> &str {
        "Find documentation files matching a query"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "doc_type": { "type": "string", "description": "File extension, e.g. md" },
                "limit": limit_schema(10)
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let results = ctx.engine.find_documents(
            query,
            optional_str(&params, "doc_type"),
            optional_limit(&params)?,
        )?;
        Ok(json!({ "results": results }))
    }
}

pub struct FindCodeReuseTool;

#[async_trait]
impl Tool for FindCodeReuseTool {
    fn name(&self) -> &str {
        "find_code_reuse"
    }

    fn description(&self) -> &str {
        "Find existing code that implements a piece of functionality"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "functionality": { "type": "string", "description": "What the code should do" },
                "service_context": { "type": "string", "description": "Service the caller works in" },
                "limit": limit_schema(5)
            },
            "required": ["functionality"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let functionality = required_str(&params, "functionality")?;
        let candidates = ctx.engine.find_code_reuse(
            functionality,
            optional_str(&params, "service_context"),
            optional_limit(&params)?,
        )?;
        Ok(json!({ "candidates": candidates }))
    }
}

pub struct ArchitectureInfoTool;

#[async_trait]
impl Tool for ArchitectureInfoTool {
    fn name(&self) -> &str {
        "get_architecture_info"
    }

    fn description(&self) -> &str {
        "Documents describing the system architecture"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "limit": limit_schema(10) }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let documents = ctx.engine.architecture_info(optional_limit(&params)?)?;
        Ok(json!({ "documents": documents }))
    }
}

pub struct IndexDocumentationTool;

#[async_trait]
impl Tool for IndexDocumentationTool {
    fn name(&self) -> &str {
        "index_documentation"
    }

    fn description(&self) -> &str {
        "Reindex the project; unchanged files are skipped unless forced"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "force": { "type": "boolean", "description": "Reparse every file", "default": false }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let force = params["force"].as_bool().unwrap_or(false);
        let summary = ctx.engine.reindex(force, &ctx.cancel).await?;
        Ok(serde_json::to_value(summary)?)
    }
}

pub struct GetItemTool;

#[async_trait]
impl Tool for GetItemTool {
    fn name(&self) -> &str {
        "get_item"
    }

    fn description(&self) -> &str {
        "Retrieve an indexed document or code entity by id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Item id, e.g. doc:docs/guide.md" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        Ok(serde_json::to_value(ctx.engine.get_item(id).await?)?)
    }
}

// ── Prompts ────────────────────────────────────────────────────────────

pub struct SearchPromptsTool;

#[async_trait]
impl Tool for SearchPromptsTool {
    fn name(&self) -> &str {
        "search_prompts"
    }

    fn description(&self) -> &str {
        "Search prompt templates by text, category and tags"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Words to match; empty lists everything", "default": "" },
                "category": { "type": "string", "description": "Prompt category, e.g. security" },
                "tags": { "type": "array", "items": { "type": "string" }, "description": "Prompts must carry every tag" },
                "limit": limit_schema(10)
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        let prompts = ctx
            .engine
            .search_prompts(
                query,
                optional_str(&params, "category"),
                &string_list(&params, "tags"),
                optional_limit(&params)?,
            )
            .await?;
        Ok(json!({ "prompts": prompts }))
    }
}

pub struct GetPromptTool;

#[async_trait]
impl Tool for GetPromptTool {
    fn name(&self) -> &str {
        "get_prompt"
    }

    fn description(&self) -> &str {
        "Retrieve a prompt template by id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        Ok(serde_json::to_value(ctx.engine.get_prompt(id).await?)?)
    }
}

pub struct CreatePromptTool;

#[async_trait]
impl Tool for CreatePromptTool {
    fn name(&self) -> &str {
        "create_prompt"
    }

    fn description(&self) -> &str {
        "Create a prompt template"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Generated when absent" },
                "name": { "type": "string" },
                "description": { "type": "string" },
                "category": { "type": "string" },
                "template_text": { "type": "string", "description": "Text with {placeholder} slots" },
                "variables": { "type": "array", "items": { "type": "string" } },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["name", "template_text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let new: NewPrompt = serde_json::from_value(params)
            .map_err(|e| Error::validation(format!("invalid prompt: {}", e)))?;
        let prompt = ctx.engine.create_prompt(new).await?;
        Ok(serde_json::to_value(prompt)?)
    }
}

pub struct EditPromptTool;

#[async_trait]
impl Tool for EditPromptTool {
    fn name(&self) -> &str {
        "edit_prompt"
    }

    fn description(&self) -> &str {
        "Update fields of a prompt template; bumps its version"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "changes": {
                    "type": "object",
                    "description": "Any of name, description, category, template_text, variables, tags"
                },
                "expected_version": { "type": "integer", "description": "Reject the edit unless the stored version matches" }
            },
            "required": ["id", "changes"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        let changes: PromptChanges = serde_json::from_value(params["changes"].clone())
            .map_err(|e| Error::validation(format!("invalid changes: {}", e)))?;
        let expected_version = params["expected_version"].as_i64();
        let prompt = ctx.engine.edit_prompt(id, changes, expected_version).await?;
        Ok(serde_json::to_value(prompt)?)
    }
}

pub struct ResolvePromptTool;

#[async_trait]
impl Tool for ResolvePromptTool {
    fn name(&self) -> &str {
        "resolve_prompt"
    }

    fn description(&self) -> &str {
        "Render a prompt from explicit values and indexed project context"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "values": { "type": "object", "description": "Placeholder name to value" },
                "auto_fill": { "type": "boolean", "default": true },
                "task": { "type": "string", "description": "Added to context-fill queries" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        let values = string_map(&params, "values")?;
        let auto_fill = params["auto_fill"].as_bool().unwrap_or(true);
        let resolution = ctx
            .engine
            .resolve_prompt(id, &values, auto_fill, optional_str(&params, "task"))
            .await?;
        Ok(serde_json::to_value(resolution)?)
    }
}

pub struct SuggestPromptsTool;

#[async_trait]
impl Tool for SuggestPromptsTool {
    fn name(&self) -> &str {
        "suggest_prompts"
    }

    fn description(&self) -> &str {
        "Suggest prompt templates for a task description"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_context": { "type": "string", "description": "What you are trying to do" },
                "limit": limit_schema(5)
            },
            "required": ["task_context"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let task_context = params["task_context"].as_str().unwrap_or("");
        let suggestions = ctx
            .engine
            .suggest_prompts(task_context, optional_limit(&params)?)
            .await?;
        Ok(json!({ "suggestions": suggestions }))
    }
}

pub struct GenerateContextualPromptTool;

#[async_trait]
impl Tool for GenerateContextualPromptTool {
    fn name(&self) -> &str {
        "generate_contextual_prompt"
    }

    fn description(&self) -> &str {
        "Build a one-off prompt around the documents matching a query"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "e.g. review, document" },
                "docs_query": { "type": "string", "description": "Query selecting the context documents" }
            },
            "required": ["task", "docs_query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let task = required_str(&params, "task")?;
        let docs_query = params["docs_query"].as_str().unwrap_or("");
        let generated = ctx.engine.generate_contextual_prompt(task, docs_query)?;
        Ok(serde_json::to_value(generated)?)
    }
}

pub struct ApplyPromptTool;

#[async_trait]
impl Tool for ApplyPromptTool {
    fn name(&self) -> &str {
        "apply_prompt_with_context"
    }

    fn description(&self) -> &str {
        "Apply a prompt template to a piece of content"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "content": { "type": "string", "description": "Bound to content-like placeholders" },
                "auto_fill": { "type": "boolean", "default": true }
            },
            "required": ["id", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        let content = params["content"].as_str().unwrap_or("");
        let auto_fill = params["auto_fill"].as_bool().unwrap_or(true);
        let resolution = ctx
            .engine
            .apply_prompt_with_context(id, content, auto_fill)
            .await?;
        Ok(serde_json::to_value(resolution)?)
    }
}

// ── Usage and stats ────────────────────────────────────────────────────

pub struct RecordUsageTool;

#[async_trait]
impl Tool for RecordUsageTool {
    fn name(&self) -> &str {
        "record_usage"
    }

    fn description(&self) -> &str {
        "Record that a prompt or item was used, with an optional outcome score"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_id": { "type": "string" },
                "context_snippet": { "type": "string", "default": "" },
                "outcome_score": { "type": "number" }
            },
            "required": ["subject_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let subject_id = required_str(&params, "subject_id")?;
        let snippet = params["context_snippet"].as_str().unwrap_or("");
        let score = params["outcome_score"].as_f64();
        ctx.engine.record_usage(subject_id, snippet, score).await?;
        Ok(json!({ "recorded": true, "usage": ctx.engine.usage_stats(subject_id) }))
    }
}

pub struct StatsTool;

#[async_trait]
impl Tool for StatsTool {
    fn name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Index and prompt statistics"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(serde_json::to_value(ctx.engine.stats().await?)?)
    }
}
