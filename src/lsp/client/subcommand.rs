//! Subcommands and the translation of their LSP results.

use std::collections::BTreeMap;

use lsp_types::{
    CodeActionOrCommand, Command, DocumentChangeOperation, DocumentChanges, GotoDefinitionResponse,
    Hover, HoverContents, MarkedString, OneOf, TextEdit, WorkspaceEdit,
};
use serde::Serialize;
use serde_json::Value;

use super::request::{Location, LocationResolver};
use crate::error::{ClientError, ClientResult};

pub const CANNOT_JUMP: &str = "Cannot jump to location";
pub const NO_HOVER: &str = "No hover information.";
pub const CANNOT_RENAME: &str = "Cannot rename the symbol under cursor.";
pub const NO_FIXITS: &str = "No fixits found for current line.";

/// A named operation a caller can run against a language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    GoTo,
    GoToDefinition,
    GoToDeclaration,
    GoToImprecise,
    GoToInclude,
    GoToReferences,
    GetType,
    GetTypeImprecise,
    GetDoc,
    FixIt,
    RefactorRename { new_name: String },
    RestartServer,
    StopServer,
}

impl Subcommand {
    pub const NAMES: [&'static str; 13] = [
        "GoTo",
        "GoToDefinition",
        "GoToDeclaration",
        "GoToImprecise",
        "GoToInclude",
        "GoToReferences",
        "GetType",
        "GetTypeImprecise",
        "GetDoc",
        "FixIt",
        "RefactorRename",
        "RestartServer",
        "StopServer",
    ];

    /// Parse a subcommand name and its arguments.
    pub fn parse(name: &str, args: &[String]) -> ClientResult<Self> {
        let subcommand = match name {
            "GoTo" => Subcommand::GoTo,
            "GoToDefinition" => Subcommand::GoToDefinition,
            "GoToDeclaration" => Subcommand::GoToDeclaration,
            "GoToImprecise" => Subcommand::GoToImprecise,
            "GoToInclude" => Subcommand::GoToInclude,
            "GoToReferences" => Subcommand::GoToReferences,
            "GetType" => Subcommand::GetType,
            "GetTypeImprecise" => Subcommand::GetTypeImprecise,
            "GetDoc" => Subcommand::GetDoc,
            "FixIt" => Subcommand::FixIt,
            "RefactorRename" => {
                let new_name = args.join(" ");
                if new_name.trim().is_empty() {
                    return Err(ClientError::NoResult(
                        "Usage: RefactorRename <new name>".to_string(),
                    ));
                }
                Subcommand::RefactorRename { new_name }
            }
            "RestartServer" => Subcommand::RestartServer,
            "StopServer" => Subcommand::StopServer,
            other => return Err(ClientError::UnknownSubcommand(other.to_string())),
        };
        Ok(subcommand)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Subcommand::GoTo => "GoTo",
            Subcommand::GoToDefinition => "GoToDefinition",
            Subcommand::GoToDeclaration => "GoToDeclaration",
            Subcommand::GoToImprecise => "GoToImprecise",
            Subcommand::GoToInclude => "GoToInclude",
            Subcommand::GoToReferences => "GoToReferences",
            Subcommand::GetType => "GetType",
            Subcommand::GetTypeImprecise => "GetTypeImprecise",
            Subcommand::GetDoc => "GetDoc",
            Subcommand::FixIt => "FixIt",
            Subcommand::RefactorRename { .. } => "RefactorRename",
            Subcommand::RestartServer => "RestartServer",
            Subcommand::StopServer => "StopServer",
        }
    }

    /// Whether the subcommand manages the server rather than querying it.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Subcommand::RestartServer | Subcommand::StopServer)
    }
}

/// A range in caller coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationRange {
    pub start: Location,
    pub end: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixItChunk {
    pub replacement_text: String,
    pub range: LocationRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixIt {
    pub text: String,
    pub location: Location,
    pub chunks: Vec<FixItChunk>,
    /// Server command still to be executed for this fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SubcommandResponse {
    Message(String),
    DetailedInfo(String),
    Location(Location),
    Locations(Vec<Location>),
    FixIts(Vec<FixIt>),
    Ack,
}

fn parse_result<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> ClientResult<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ClientError::Parse {
            message: format!("unexpected {} result: {}", what, e),
        })
}

fn locations_response(mut locations: Vec<Location>) -> ClientResult<SubcommandResponse> {
    match locations.len() {
        0 => Err(ClientError::NoResult(CANNOT_JUMP.to_string())),
        1 => Ok(SubcommandResponse::Location(locations.remove(0))),
        _ => Ok(SubcommandResponse::Locations(locations)),
    }
}

/// Result of `textDocument/definition` or `textDocument/declaration`.
pub fn definition_response(
    value: Value,
    resolver: &mut LocationResolver<'_>,
) -> ClientResult<SubcommandResponse> {
    let Some(response) = parse_result::<GotoDefinitionResponse>(value, "definition")? else {
        return Err(ClientError::NoResult(CANNOT_JUMP.to_string()));
    };

    let locations = match response {
        GotoDefinitionResponse::Scalar(location) => resolver
            .resolve(location.uri.as_str(), location.range.start)
            .into_iter()
            .collect(),
        GotoDefinitionResponse::Array(locations) => locations
            .iter()
            .filter_map(|l| resolver.resolve(l.uri.as_str(), l.range.start))
            .collect(),
        GotoDefinitionResponse::Link(links) => links
            .iter()
            .filter_map(|l| resolver.resolve(l.target_uri.as_str(), l.target_selection_range.start))
            .collect(),
    };
    locations_response(locations)
}

/// Result of `textDocument/references`, each location described by its line.
pub fn references_response(
    value: Value,
    resolver: &mut LocationResolver<'_>,
) -> ClientResult<SubcommandResponse> {
    let references = parse_result::<Vec<lsp_types::Location>>(value, "references")?.unwrap_or_default();
    let mut locations = Vec::with_capacity(references.len());
    for reference in &references {
        let Some(mut location) = resolver.resolve(reference.uri.as_str(), reference.range.start) else {
            continue;
        };
        location.description = line_text(&location).map(|line| line.trim().to_string());
        locations.push(location);
    }
    if locations.is_empty() {
        return Err(ClientError::NoResult(CANNOT_JUMP.to_string()));
    }
    Ok(SubcommandResponse::Locations(locations))
}

fn line_text(location: &Location) -> Option<String> {
    let contents = std::fs::read_to_string(&location.filepath).ok()?;
    contents
        .lines()
        .nth(location.line_num.saturating_sub(1))
        .map(str::to_string)
}

/// Parse a hover result; `None` when the server had nothing.
pub fn parse_hover(value: Value) -> ClientResult<Option<Hover>> {
    parse_result::<Hover>(value, "hover")
}

/// Plain text of a hover: markup value, or the string parts joined.
pub fn hover_text(hover: &Hover) -> String {
    match &hover.contents {
        HoverContents::Markup(markup) => markup.value.clone(),
        HoverContents::Scalar(marked) => marked_string_text(marked).to_string(),
        HoverContents::Array(items) => items
            .iter()
            .map(marked_string_text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn marked_string_text(marked: &MarkedString) -> &str {
    match marked {
        MarkedString::String(text) => text,
        MarkedString::LanguageString(code) => &code.value,
    }
}

/// Hover contents as a list of marked strings, whatever shape was sent.
pub fn hover_items(hover: &Hover) -> Vec<MarkedString> {
    match &hover.contents {
        HoverContents::Scalar(marked) => vec![marked.clone()],
        HoverContents::Array(items) => items.clone(),
        HoverContents::Markup(markup) => vec![MarkedString::String(markup.value.clone())],
    }
}

fn text_edits_to_chunks(
    path: &std::path::Path,
    edits: impl IntoIterator<Item = TextEdit>,
    resolver: &mut LocationResolver<'_>,
    chunks: &mut Vec<FixItChunk>,
) {
    for edit in edits {
        chunks.push(FixItChunk {
            replacement_text: edit.new_text,
            range: LocationRange {
                start: resolver.resolve_path(path, edit.range.start),
                end: resolver.resolve_path(path, edit.range.end),
            },
        });
    }
}

/// Flatten a workspace edit into one FixIt.
pub fn workspace_edit_to_fixit(
    edit: WorkspaceEdit,
    text: impl Into<String>,
    resolver: &mut LocationResolver<'_>,
) -> FixIt {
    let mut chunks = Vec::new();

    if let Some(changes) = edit.changes {
        let ordered: BTreeMap<String, Vec<TextEdit>> = changes
            .into_iter()
            .map(|(uri, edits)| (uri.as_str().to_string(), edits))
            .collect();
        for (uri, edits) in ordered {
            if let Some(path) = crate::lsp::protocol::uri_to_path(&uri) {
                text_edits_to_chunks(&path, edits, resolver, &mut chunks);
            }
        }
    }

    let document_edits = match edit.document_changes {
        Some(DocumentChanges::Edits(edits)) => edits,
        Some(DocumentChanges::Operations(operations)) => operations
            .into_iter()
            .filter_map(|op| match op {
                DocumentChangeOperation::Edit(edit) => Some(edit),
                DocumentChangeOperation::Op(_) => None,
            })
            .collect(),
        None => Vec::new(),
    };
    for document_edit in document_edits {
        let Some(path) = crate::lsp::protocol::uri_to_path(document_edit.text_document.uri.as_str())
        else {
            continue;
        };
        let edits = document_edit.edits.into_iter().map(|edit| match edit {
            OneOf::Left(edit) => edit,
            OneOf::Right(annotated) => annotated.text_edit,
        });
        text_edits_to_chunks(&path, edits, resolver, &mut chunks);
    }

    FixIt {
        text: text.into(),
        location: resolver.request_location(),
        chunks,
        command: None,
    }
}

/// Result of `textDocument/rename`.
pub fn rename_response(
    value: Value,
    resolver: &mut LocationResolver<'_>,
) -> ClientResult<SubcommandResponse> {
    let Some(edit) = parse_result::<WorkspaceEdit>(value, "rename")? else {
        return Err(ClientError::NoResult(CANNOT_RENAME.to_string()));
    };
    Ok(SubcommandResponse::FixIts(vec![workspace_edit_to_fixit(edit, "", resolver)]))
}

/// Command whose first argument is a workspace edit to apply.
pub const CLANGD_APPLY_FIX: &str = "clangd.applyFix";

fn command_to_fixit(command: Command, resolver: &mut LocationResolver<'_>) -> FixIt {
    if command.command == CLANGD_APPLY_FIX {
        let edit = command
            .arguments
            .as_ref()
            .and_then(|args| args.first())
            .and_then(|arg| serde_json::from_value::<WorkspaceEdit>(arg.clone()).ok());
        if let Some(edit) = edit {
            return workspace_edit_to_fixit(edit, command.title, resolver);
        }
    }
    FixIt {
        text: command.title.clone(),
        location: resolver.request_location(),
        chunks: Vec::new(),
        command: serde_json::to_value(&command).ok(),
    }
}

/// Result of `textDocument/codeAction`.
pub fn code_actions_response(
    value: Value,
    resolver: &mut LocationResolver<'_>,
) -> ClientResult<SubcommandResponse> {
    let actions = parse_result::<Vec<CodeActionOrCommand>>(value, "codeAction")?.unwrap_or_default();
    let mut fixits = Vec::new();
    for action in actions {
        match action {
            CodeActionOrCommand::Command(command) => fixits.push(command_to_fixit(command, resolver)),
            CodeActionOrCommand::CodeAction(action) => match (action.edit, action.command) {
                (Some(edit), command) => {
                    let mut fixit = workspace_edit_to_fixit(edit, action.title, resolver);
                    fixit.command = command.and_then(|c| serde_json::to_value(c).ok());
                    fixits.push(fixit);
                }
                (None, Some(command)) => {
                    let mut fixit = command_to_fixit(command, resolver);
                    fixit.text = action.title;
                    fixits.push(fixit);
                }
                (None, None) => {}
            },
        }
    }
    if fixits.is_empty() {
        return Err(ClientError::NoResult(NO_FIXITS.to_string()));
    }
    Ok(SubcommandResponse::FixIts(fixits))
}
