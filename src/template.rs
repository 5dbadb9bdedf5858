//! # Template loading and structure
//!
//! A template decides how the assistant is primed before the conversation
//! history: a `system_prompt` plus optional seed `messages` (serialized
//! [`async_openai::types::chat::ChatCompletionRequestMessage`] values).
//!
//! The built-in template ([`ChatTemplate::default`]) describes the
//! getDatabaseStructure → generateQuery → executeQuery workflow and the
//! `mermaid` chart grammar answers may use. A YAML file can replace it by
//! setting `template_path` in the configuration.
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a database query assistant. Answer in French."
//! messages:
//!   - role: "user"
//!     content: "Which tables exist?"
//!   - role: "assistant"
//!     content: "Let me look at the database structure first."
//! ```

use std::fs;

use async_openai::types::chat::ChatCompletionRequestMessage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{config::DbaiConfig, error::Result};

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a database query assistant. Your primary functions are:
1. Get the database structure using the getDatabaseStructure tool.
2. Generate a SQL query based on the user's request and the database structure using the generateQuery tool.
3. Execute the generated query using the executeQuery tool.
4. Return the query results to the user in a clear and formatted manner.
Only answer questions that can be addressed using the provided database schema.
If a question cannot be answered using the database schema, politely inform the user that the query is not possible with the current database structure.
Do not provide any information or answers that are not directly based on the database schema or the query results.
Use mermaid to visualise results when a supported chart fits (bar, line, pie, timeline, journey, quadrant, gantt).
You must be strict with the mermaid format, it must be started with "```mermaid" and ended with "```".
Only one mermaid chart is allowed per response.
For bar chart, line chart - you can use the xychart-beta format.
For pie chart, you can use the pie chart format.
For timeline, you can use the timeline format.
For journey, you can use the journey format.
For quadrant, you can use the quadrantChart format.
For gantt, you can use the gantt format.

Examples of mermaid format:

// XY chart example
```mermaid
xychart-beta
title "Sales Revenue"
x-axis [jan, feb, mar, apr, may, jun, jul, aug, sep, oct, nov, dec]
y-axis "Revenue (in $)" 4000 --> 11000
bar [5000, 6000, 7500, 8200, 9500, 10500, 11000, 10200, 9200, 8500, 7000, 6000]
line [5000, 6000, 7500, 8200, 9500, 10500, 11000, 10200, 9200, 8500, 7000, 6000]
```

// Pie chart example
```mermaid
pie
title "number of users"
"data 1": 10
"data 2": 20
"data 3": 30
```

// Timeline example
```mermaid
timeline
title History of Social Media Platform
2002 : LinkedIn
2004 : Facebook
     : Google
2005 : Youtube
2006 : Twitter
```

// Journey chart example
```mermaid
journey
title My working day
section Go to work
  Make tea: 5: Me
  Go upstairs: 3: Me
  Do work: 1: Me, Cat
section Go home
  Go downstairs: 5: Me
  Sit down: 5: Me
```

// Quadrant chart example
```mermaid
quadrantChart
title Reach and engagement of campaigns
x-axis Low Reach --> High Reach
y-axis Low Engagement --> High Engagement
quadrant-1 We should expand
quadrant-2 Need to promote
quadrant-3 Re-evaluate
quadrant-4 May be improved
Campaign A: [0.3, 0.6]
Campaign B: [0.45, 0.23]
Campaign C: [0.57, 0.69]
```

// Gantt chart example
```mermaid
gantt
title A Gantt Diagram
dateFormat YYYY-MM-DD
section Section
    A task          :a1, 2014-01-01, 30d
    Another task    :after a1, 20d
section Another
    Task in Another :2014-01-12, 12d
    another task    :24d
```
"#;

/// A reusable assistant template.
///
/// ### Fields
/// - [`system_prompt`](Self::system_prompt): instruction sent as the first
///   system message of every turn.
/// - [`messages`](Self::messages): seed messages inserted after the system
///   prompt and before the stored history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTemplate {
    pub system_prompt: String,

    #[serde(default)]
    pub messages: Vec<ChatCompletionRequestMessage>,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            messages: Vec::new(),
        }
    }
}

/// Load a chat template from a YAML file.
///
/// ### Errors
/// Returns an error if the file cannot be read or does not deserialize into a
/// [`ChatTemplate`].
pub fn load_template(path: &str) -> Result<ChatTemplate> {
    info!("Loading template: {}", path);

    let content = fs::read_to_string(path)?;
    let template: ChatTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

/// The configured template, or the built-in one when none is configured.
pub fn resolve_template(config: &DbaiConfig) -> Result<ChatTemplate> {
    match &config.template_path {
        Some(path) => load_template(path),
        None => Ok(ChatTemplate::default()),
    }
}
