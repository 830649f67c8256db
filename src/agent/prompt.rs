//! Stage prompt templates and rendering.
//!
//! Each stage uses a named template with double-brace placeholders
//! (`{{transcript_text}}`, `{{existing_nodes}}`, ...). Templates are
//! loaded once per agent and cached; external template files override
//! the compiled-in defaults per file. JSON example blocks inside the
//! templates are preserved verbatim so the model sees exact shapes.

use std::collections::HashMap;
use std::path::Path;

/// Template for the segmentation stage.
pub const SEGMENTATION_TEMPLATE: &str = r#"You convert live voice transcripts into a structured knowledge tree. This step segments a transcript into coherent thought units.

## Instructions

1. Read the transcript segment and its recent history for context.
2. Split the segment into chunks, one per coherent thought, task, problem, or concept. A chunk may span several sentences; do not split mid-idea.
3. Give each chunk a short lowercase name (2-4 words) that identifies the thought. Names must be unique within this response.
4. If the final chunk trails off mid-thought (cut off by the transcription boundary), set its "is_complete" to false. All earlier chunks are complete.
5. Do not paraphrase: "text" must reproduce the relevant transcript text.

## Output Format (JSON)

```json
{
  "chunks": [
    {"name": "project scope", "text": "The first step is to define the project scope.", "is_complete": true},
    {"name": "trailing thought", "text": "And then we should also", "is_complete": false}
  ]
}
```

## Rules

- Every word of the transcript segment must land in exactly one chunk.
- Return ONLY the JSON object, no surrounding text.

## Inputs

Recent transcript history (context only, do not segment):
```
{{transcript_history}}
```

Transcript segment to segment:
```
{{transcript_text}}
```"#;

/// Template for the relationship-analysis stage.
pub const RELATIONSHIP_TEMPLATE: &str = r#"You convert live voice transcripts into a structured knowledge tree. This step relates new thought chunks to the existing nodes of the tree.

## Instructions

1. For each chunk, find the existing node it most relates to. Prefer semantically close nodes; avoid the root node unless nothing else fits.
2. If no existing node is relevant, use "NO_RELEVANT_NODE".
3. Describe the relationship from the relevant node's perspective as a short verb phrase (e.g. "child of", "prereq for", "blocked by"), or null when there is no relevant node.
4. Give one or two sentences of reasoning per chunk.
5. Preserve each chunk's "name" and "text" exactly as given.

## Output Format (JSON)

```json
{
  "analyses": [
    {"name": "project scope", "text": "The first step is to define the project scope.", "reasoning": "Scope definition extends the planning work already captured.", "relevant_node_name": "Project Planning", "relationship": "child of"},
    {"name": "new idea", "text": "Something unrelated came up.", "reasoning": "No existing node covers this.", "relevant_node_name": "NO_RELEVANT_NODE", "relationship": null}
  ]
}
```

## Rules

- "relevant_node_name" must be an existing node title or "NO_RELEVANT_NODE"; never invent a node here.
- Return ONLY the JSON object, no surrounding text.

## Inputs

Existing nodes:
```
{{existing_nodes}}
```

Chunks:
```
{{chunks}}
```"#;

/// Template for the integration-decision stage.
pub const INTEGRATION_TEMPLATE: &str = r#"You convert live voice transcripts into a structured knowledge tree. This step decides how each analyzed chunk is integrated: appended to an existing node, or made into a new node.

## Instructions

1. For each chunk, choose "APPEND" when its content extends an existing node, "CREATE" when it is a distinct new concept.
2. For CREATE: set "new_node_name" (short title, no pronouns), "new_node_summary" (dense, at most 3 sentences), "relationship" (edge label to the parent), and "target_node" (the parent node title, or "NO_RELEVANT_NODE" to attach to the root).
3. For APPEND: set "target_node" (the node to extend) and "updated_summary" (the node's summary extended with the new information).
4. Always set "content": concise Markdown bullet points capturing details not already obvious from the summary.
5. Preserve each chunk's "name" exactly as given.

## Output Format (JSON)

```json
{
  "decisions": [
    {"name": "project scope", "action": "APPEND", "target_node": "Project Planning", "updated_summary": "Scope, stakeholders, and timeline definition.", "content": "- define the project scope first"},
    {"name": "investor outreach", "action": "CREATE", "target_node": "Project Planning", "new_node_name": "Investor Outreach", "new_node_summary": "Early conversations with potential investors.", "relationship": "child of", "content": "- start reaching out to investors"}
  ]
}
```

## Rules

- "action" is exactly "CREATE" or "APPEND" (uppercase).
- Never change an existing node's title via APPEND.
- Return ONLY the JSON object, no surrounding text.

## Inputs

Existing nodes:
```
{{existing_nodes}}
```

Analyzed chunks:
```
{{analyzed_chunks}}
```"#;

/// Template for the background rewrite of a single node.
pub const REWRITE_TEMPLATE: &str = r#"You maintain a knowledge tree built from live voice transcripts. This node has accumulated appended fragments; rewrite it as a clean, deduplicated whole.

## Instructions

1. Merge overlapping bullets, remove repetition, keep every distinct fact.
2. Keep the node's voice: concise Markdown bullet points.
3. Rewrite the summary: dense, at most 3 sentences, no pronouns.
4. If the raw transcript makes it obvious the node belongs under a different existing node, set "new_parent" to that node's title; otherwise null.

## Output Format (JSON)

```json
{
  "content": "- merged bullet one\n- merged bullet two",
  "summary": "Dense rewritten summary.",
  "new_parent": null
}
```

## Rules

- Do not invent facts that are not in the content or transcript.
- Return ONLY the JSON object, no surrounding text.

## Inputs

Node title: `{{title}}`

Current content:
```
{{content}}
```

Current summary:
```
{{summary}}
```

Raw transcript excerpts behind this node:
```
{{transcript_history}}
```

Existing nodes:
```
{{existing_nodes}}
```"#;

/// Filename for the segmentation template override.
const SEGMENTATION_FILENAME: &str = "segmentation.md";
/// Filename for the relationship-analysis template override.
const RELATIONSHIP_FILENAME: &str = "relationship_analysis.md";
/// Filename for the integration-decision template override.
const INTEGRATION_FILENAME: &str = "integration_decision.md";
/// Filename for the rewrite template override.
const REWRITE_FILENAME: &str = "rewrite.md";

/// Default prompt directory under user config.
const DEFAULT_PROMPT_DIR: &str = ".config/voicetree/prompts";

/// The cached set of stage templates.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from configuration, environment, or the default path.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// Segmentation stage template.
    pub segmentation: String,
    /// Relationship-analysis stage template.
    pub relationship: String,
    /// Integration-decision stage template.
    pub integration: String,
    /// Background rewrite template.
    pub rewrite: String,
}

impl PromptSet {
    /// Loads templates from the given directory, falling back to
    /// compiled-in defaults.
    ///
    /// Resolution order for the directory:
    /// 1. Explicit `prompt_dir` argument
    /// 2. `VOICETREE_PROMPT_DIR` environment variable
    /// 3. `~/.config/voicetree/prompts/`
    ///
    /// Each file is loaded independently; a missing file uses its
    /// default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(std::path::PathBuf::from)
            .or_else(|| {
                std::env::var("VOICETREE_PROMPT_DIR")
                    .ok()
                    .map(std::path::PathBuf::from)
            })
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            segmentation: load_file(SEGMENTATION_FILENAME, SEGMENTATION_TEMPLATE),
            relationship: load_file(RELATIONSHIP_FILENAME, RELATIONSHIP_TEMPLATE),
            integration: load_file(INTEGRATION_FILENAME, INTEGRATION_TEMPLATE),
            rewrite: load_file(REWRITE_FILENAME, REWRITE_TEMPLATE),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            segmentation: SEGMENTATION_TEMPLATE.to_string(),
            relationship: RELATIONSHIP_TEMPLATE.to_string(),
            integration: INTEGRATION_TEMPLATE.to_string(),
            rewrite: REWRITE_TEMPLATE.to_string(),
        }
    }

    /// Writes the compiled-in default templates to the given
    /// directory, creating it if needed. Existing files are **not**
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing
    /// fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (SEGMENTATION_FILENAME, SEGMENTATION_TEMPLATE),
            (RELATIONSHIP_FILENAME, RELATIONSHIP_TEMPLATE),
            (INTEGRATION_FILENAME, INTEGRATION_TEMPLATE),
            (REWRITE_FILENAME, REWRITE_TEMPLATE),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }
}

/// Renders a template, substituting `{{key}}` placeholders.
///
/// Unknown placeholders are left verbatim so JSON example blocks that
/// happen to contain braces survive untouched.
#[must_use]
pub fn render(template: &str, variables: &HashMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}
