//! Structural source parsing with tree-sitter.
//!
//! Each source file becomes a module entity plus one entity per class-like
//! declaration (Python classes; Rust structs, enums, traits and inline
//! modules) and per function or method. Entities link to their enclosing
//! declaration through `parent_id` and keep their declaration order in the
//! `ordinal` metadata field. Import and `use` declarations are recorded on the
//! module entity as `dependency_refs`.
//!
//! A file containing any syntax error is rejected as a whole.

use std::collections::{HashMap, HashSet};

use tree_sitter::{Language, Node, Parser as TsParser};

use crate::error::{Error, Result};
use crate::models::{code_entity_id, CodeEntity, EntityType, IndexedItem, ItemKind, SourceFile};
use crate::parser::{base_metadata, extension, file_stem, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Python,
    Rust,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Python => "python",
            Lang::Rust => "rust",
        }
    }

    pub fn detect(path: &str) -> Option<Lang> {
        match extension(path)?.as_str() {
            "py" | "pyi" => Some(Lang::Python),
            "rs" => Some(Lang::Rust),
            _ => None,
        }
    }

    fn grammar(&self) -> Language {
        match self {
            Lang::Python => tree_sitter_python::LANGUAGE.into(),
            Lang::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

pub struct CodeParser {
    lang: Lang,
}

impl CodeParser {
    pub fn python() -> Self {
        Self { lang: Lang::Python }
    }

    pub fn rust() -> Self {
        Self { lang: Lang::Rust }
    }
}

impl Parser for CodeParser {
    fn name(&self) -> &str {
        self.lang.as_str()
    }

    fn can_handle(&self, path: &str) -> bool {
        Lang::detect(path) == Some(self.lang)
    }

    fn parse(&self, file: &SourceFile) -> Result<Vec<IndexedItem>> {
        // tree_sitter::Parser is not Sync; build one per file
        let mut parser = TsParser::new();
        parser
            .set_language(&self.lang.grammar())
            .map_err(|e| Error::parse_failure(&file.path, e.to_string()))?;

        let tree = parser
            .parse(&file.content, None)
            .ok_or_else(|| Error::parse_failure(&file.path, "parser produced no tree"))?;
        let root = tree.root_node();

        if root.has_error() {
            let row = first_error(root).map(|n| n.start_position().row + 1).unwrap_or(1);
            return Err(Error::parse_failure(
                &file.path,
                format!("syntax error near line {}", row),
            ));
        }

        let mut collector = Collector::new(file, self.lang);
        collector.collect(root);
        Ok(collector.finish())
    }
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

/// One declaration found while walking the tree.
struct Declared {
    entity_type: EntityType,
    name: String,
    qualified: String,
    signature: String,
    description: String,
    parent_id: String,
    line_start: usize,
    line_end: usize,
}

struct Collector<'a> {
    file: &'a SourceFile,
    lang: Lang,
    module_id: String,
    declared: Vec<Declared>,
    used_names: HashMap<String, usize>,
    imports: Vec<String>,
    module_doc: String,
}

impl<'a> Collector<'a> {
    fn new(file: &'a SourceFile, lang: Lang) -> Self {
        Self {
            file,
            lang,
            module_id: code_entity_id(&file.path, ""),
            declared: Vec::new(),
            used_names: HashMap::new(),
            imports: Vec::new(),
            module_doc: String::new(),
        }
    }

    fn text(&self, node: Node) -> &'a str {
        let file: &'a SourceFile = self.file;
        node.utf8_text(file.content.as_bytes()).unwrap_or("")
    }

    fn collect(&mut self, root: Node) {
        self.module_doc = match self.lang {
            Lang::Python => self.python_docstring(root).unwrap_or_default(),
            Lang::Rust => self.rust_inner_doc(root),
        };
        self.collect_imports(root);
        let module_id = self.module_id.clone();
        match self.lang {
            Lang::Python => self.visit_python_block(root, &module_id, ""),
            Lang::Rust => self.visit_rust_block(root, &module_id, ""),
        }
    }

    /// Qualified name made unique within the file with a `~N` suffix.
    fn unique(&mut self, qualified: String) -> String {
        let count = self.used_names.entry(qualified.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            qualified
        } else {
            format!("{}~{}", qualified, count)
        }
    }

    fn declare(
        &mut self,
        node: Node,
        entity_type: EntityType,
        name: &str,
        prefix: &str,
        signature: String,
        description: String,
        parent_id: &str,
    ) -> (String, String) {
        let qualified = self.unique(qualify(prefix, name));
        let id = code_entity_id(&self.file.path, &qualified);
        self.declared.push(Declared {
            entity_type,
            name: name.to_string(),
            qualified: qualified.clone(),
            signature,
            description,
            parent_id: parent_id.to_string(),
            line_start: node.start_position().row + 1,
            line_end: node.end_position().row + 1,
        });
        (id, qualified)
    }

    fn collect_imports(&mut self, node: Node) {
        match (self.lang, node.kind()) {
            (Lang::Python, "import_statement") => {
                let mut cursor = node.walk();
                let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    let target = if name.kind() == "aliased_import" {
                        name.child_by_field_name("name").unwrap_or(name)
                    } else {
                        name
                    };
                    self.push_import(self.text(target));
                }
                return;
            }
            (Lang::Python, "import_from_statement") => {
                if let Some(module) = node.child_by_field_name("module_name") {
                    self.push_import(self.text(module));
                }
                return;
            }
            (Lang::Rust, "use_declaration") => {
                if let Some(arg) = node.child_by_field_name("argument") {
                    self.push_import(self.text(arg));
                }
                return;
            }
            (Lang::Rust, "extern_crate_declaration") => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.push_import(self.text(name));
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_imports(child);
        }
    }

    fn push_import(&mut self, import: &str) {
        let import = import.split_whitespace().collect::<Vec<_>>().join(" ");
        if !import.is_empty() && !self.imports.contains(&import) {
            self.imports.push(import);
        }
    }

    // ---------------------------------------------------------------- python

    fn visit_python_block(&mut self, block: Node, parent_id: &str, prefix: &str) {
        let mut cursor = block.walk();
        let children: Vec<Node> = block.named_children(&mut cursor).collect();
        for child in children {
            let node = if child.kind() == "decorated_definition" {
                match child.child_by_field_name("definition") {
                    Some(def) => def,
                    None => continue,
                }
            } else {
                child
            };

            match node.kind() {
                "class_definition" => {
                    let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
                        continue;
                    };
                    let bases = node
                        .child_by_field_name("superclasses")
                        .map(|n| self.text(n))
                        .unwrap_or("");
                    let body = node.child_by_field_name("body");
                    let description = body.and_then(|b| self.python_docstring(b)).unwrap_or_default();
                    let (id, qualified) = self.declare(
                        node,
                        EntityType::Class,
                        name,
                        prefix,
                        format!("class {}{}", name, bases),
                        description,
                        parent_id,
                    );
                    if let Some(body) = body {
                        self.visit_python_block(body, &id, &qualified);
                    }
                }
                "function_definition" => {
                    let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
                        continue;
                    };
                    let params = node
                        .child_by_field_name("parameters")
                        .map(|p| self.python_params(p))
                        .unwrap_or_default();
                    let body = node.child_by_field_name("body");
                    let description = body.and_then(|b| self.python_docstring(b)).unwrap_or_default();
                    let (id, qualified) = self.declare(
                        node,
                        EntityType::Function,
                        name,
                        prefix,
                        format!("{}({})", name, params.join(", ")),
                        description,
                        parent_id,
                    );
                    if let Some(body) = body {
                        self.visit_python_block(body, &id, &qualified);
                    }
                }
                _ => {}
            }
        }
    }

    fn python_params(&self, params: Node) -> Vec<String> {
        let mut cursor = params.walk();
        let children: Vec<Node> = params.named_children(&mut cursor).collect();
        children
            .into_iter()
            .filter_map(|p| match p.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    Some(self.text(p).to_string())
                }
                "default_parameter" | "typed_default_parameter" => p
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string()),
                "typed_parameter" => p.named_child(0).map(|n| self.text(n).to_string()),
                _ => None,
            })
            .collect()
    }

    /// First statement of a block, when it is a bare string literal.
    fn python_docstring(&self, block: Node) -> Option<String> {
        let mut cursor = block.walk();
        let first = block
            .named_children(&mut cursor)
            .find(|n| n.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        Some(clean_python_string(self.text(string)))
    }

    // ------------------------------------------------------------------ rust

    fn visit_rust_block(&mut self, block: Node, parent_id: &str, prefix: &str) {
        let mut cursor = block.walk();
        let children: Vec<Node> = block.named_children(&mut cursor).collect();

        // impl blocks may precede the type they extend
        let local_types: HashSet<String> = children
            .iter()
            .filter(|c| matches!(c.kind(), "struct_item" | "enum_item" | "union_item" | "trait_item"))
            .filter_map(|c| c.child_by_field_name("name"))
            .map(|n| self.text(n).to_string())
            .collect();
        let mut type_ids: HashMap<String, (String, String)> = HashMap::new();

        for node in children.iter().copied() {
            match node.kind() {
                "struct_item" | "enum_item" | "union_item" | "trait_item" => {
                    let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
                        continue;
                    };
                    let keyword = match node.kind() {
                        "struct_item" => "struct",
                        "enum_item" => "enum",
                        "union_item" => "union",
                        _ => "trait",
                    };
                    let description = self.rust_doc_comment(node);
                    let (id, qualified) = self.declare(
                        node,
                        EntityType::Class,
                        name,
                        prefix,
                        format!("{} {}", keyword, name),
                        description,
                        parent_id,
                    );
                    type_ids.insert(name.to_string(), (id.clone(), qualified.clone()));
                    if node.kind() == "trait_item" {
                        if let Some(body) = node.child_by_field_name("body") {
                            self.visit_rust_block(body, &id, &qualified);
                        }
                    }
                }
                "function_item" | "function_signature_item" => {
                    let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
                        continue;
                    };
                    let params = node
                        .child_by_field_name("parameters")
                        .map(|p| self.rust_params(p))
                        .unwrap_or_default();
                    let description = self.rust_doc_comment(node);
                    let (id, qualified) = self.declare(
                        node,
                        EntityType::Function,
                        name,
                        prefix,
                        format!("{}({})", name, params.join(", ")),
                        description,
                        parent_id,
                    );
                    // Items declared inside the body sit directly in its block
                    if let Some(body) = node.child_by_field_name("body") {
                        self.visit_rust_block(body, &id, &qualified);
                    }
                }
                "impl_item" => {
                    let Some(type_name) = node
                        .child_by_field_name("type")
                        .map(|t| base_type_name(self.text(t)))
                    else {
                        continue;
                    };
                    let (impl_parent, impl_prefix) = match type_ids.get(&type_name) {
                        Some((id, qualified)) => (id.clone(), qualified.clone()),
                        None if local_types.contains(&type_name) => {
                            let qualified = qualify(prefix, &type_name);
                            (code_entity_id(&self.file.path, &qualified), qualified)
                        }
                        None => (parent_id.to_string(), qualify(prefix, &type_name)),
                    };
                    if let Some(body) = node.child_by_field_name("body") {
                        self.visit_rust_block(body, &impl_parent, &impl_prefix);
                    }
                }
                "mod_item" => {
                    let (Some(name), Some(body)) = (
                        node.child_by_field_name("name").map(|n| self.text(n)),
                        node.child_by_field_name("body"),
                    ) else {
                        continue;
                    };
                    let description = self.rust_doc_comment(node);
                    let (id, qualified) = self.declare(
                        node,
                        EntityType::Module,
                        name,
                        prefix,
                        format!("mod {}", name),
                        description,
                        parent_id,
                    );
                    self.visit_rust_block(body, &id, &qualified);
                }
                _ => {}
            }
        }
    }

    fn rust_params(&self, params: Node) -> Vec<String> {
        let mut cursor = params.walk();
        let children: Vec<Node> = params.named_children(&mut cursor).collect();
        children
            .into_iter()
            .filter_map(|p| match p.kind() {
                "self_parameter" => Some("self".to_string()),
                "parameter" => p
                    .child_by_field_name("pattern")
                    .map(|n| self.text(n).trim_start_matches("mut ").to_string()),
                _ => None,
            })
            .collect()
    }

    /// `///` and `/** */` comments directly above a declaration, skipping attributes.
    fn rust_doc_comment(&self, node: Node) -> String {
        let mut lines = Vec::new();
        let mut current = node.prev_sibling();
        while let Some(sibling) = current {
            match sibling.kind() {
                "attribute_item" => {}
                "line_comment" => {
                    let text = self.text(sibling);
                    match text.strip_prefix("///") {
                        Some(doc) if !doc.starts_with('/') => lines.push(doc.trim().to_string()),
                        _ => break,
                    }
                }
                "block_comment" => {
                    let text = self.text(sibling);
                    match text.strip_prefix("/**") {
                        Some(doc) => {
                            lines.push(clean_block_comment(doc.trim_end_matches("*/")));
                        }
                        None => break,
                    }
                }
                _ => break,
            }
            current = sibling.prev_sibling();
        }
        lines.reverse();
        lines.join("\n").trim().to_string()
    }

    /// `//!` comments at the top of a Rust file.
    fn rust_inner_doc(&self, root: Node) -> String {
        let mut cursor = root.walk();
        let children: Vec<Node> = root.children(&mut cursor).collect();
        children
            .into_iter()
            .take_while(|c| c.kind() == "line_comment" || c.kind() == "inner_attribute_item")
            .filter_map(|c| self.text(c).strip_prefix("//!").map(|d| d.trim().to_string()))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    fn finish(self) -> Vec<IndexedItem> {
        let file = self.file;
        let module_name = file_stem(&file.path);
        let module_doc = self.module_doc.clone();

        let mut items = Vec::with_capacity(self.declared.len() + 1);

        let module_meta = entity_metadata(file, self.lang, 0, 1, file.content.lines().count().max(1), "");
        let module_content = if self.imports.is_empty() {
            join_content(&module_name, &module_doc)
        } else {
            format!(
                "{}\nimports: {}",
                join_content(&module_name, &module_doc),
                self.imports.join(", ")
            )
        };
        items.push(IndexedItem {
            id: self.module_id.clone(),
            path: file.path.clone(),
            fingerprint: file.fingerprint.clone(),
            kind: ItemKind::CodeEntity,
            title: module_name.clone(),
            content: module_content,
            metadata: module_meta,
            indexed_at: file.indexed_at,
            code: Some(CodeEntity {
                entity_type: EntityType::Module,
                name: module_name.clone(),
                signature: module_name,
                description: module_doc,
                owner_path: file.path.clone(),
                parent_id: None,
                dependency_refs: self.imports.clone(),
            }),
        });

        for (ordinal, d) in self.declared.into_iter().enumerate() {
            items.push(IndexedItem {
                id: code_entity_id(&file.path, &d.qualified),
                path: file.path.clone(),
                fingerprint: file.fingerprint.clone(),
                kind: ItemKind::CodeEntity,
                title: d.name.clone(),
                content: join_content(&d.signature, &d.description),
                metadata: entity_metadata(
                    file,
                    self.lang,
                    ordinal + 1,
                    d.line_start,
                    d.line_end,
                    &d.qualified,
                ),
                indexed_at: file.indexed_at,
                code: Some(CodeEntity {
                    entity_type: d.entity_type,
                    name: d.name,
                    signature: d.signature,
                    description: d.description,
                    owner_path: file.path.clone(),
                    parent_id: Some(d.parent_id),
                    dependency_refs: Vec::new(),
                }),
            });
        }

        items
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn join_content(head: &str, body: &str) -> String {
    if body.is_empty() {
        head.to_string()
    } else {
        format!("{}\n{}", head, body)
    }
}

fn entity_metadata(
    file: &SourceFile,
    lang: Lang,
    ordinal: usize,
    line_start: usize,
    line_end: usize,
    qualified_name: &str,
) -> serde_json::Value {
    let mut meta = base_metadata(file);
    meta.insert("language".to_string(), serde_json::json!(lang.as_str()));
    meta.insert("ordinal".to_string(), serde_json::json!(ordinal));
    meta.insert("line_start".to_string(), serde_json::json!(line_start));
    meta.insert("line_end".to_string(), serde_json::json!(line_end));
    meta.insert("qualified_name".to_string(), serde_json::json!(qualified_name));
    serde_json::Value::Object(meta)
}

/// `Foo<T>` and `crate::a::Foo` both become `Foo`.
fn base_type_name(text: &str) -> String {
    let no_generics = text.split('<').next().unwrap_or(text);
    no_generics
        .rsplit("::")
        .next()
        .unwrap_or(no_generics)
        .trim()
        .to_string()
}

fn clean_python_string(raw: &str) -> String {
    let unprefixed = raw.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            unprefixed
                .strip_prefix(q)
                .and_then(|s| s.strip_suffix(q))
        })
        .unwrap_or(unprefixed);
    dedent(inner)
}

fn clean_block_comment(inner: &str) -> String {
    dedent(
        &inner
            .lines()
            .map(|l| l.trim_start().trim_start_matches('*'))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn dedent(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
