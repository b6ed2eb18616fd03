/// A prompt string with `{placeholder}` substitution.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitute each `{key}` with its value. Unknown placeholders are
    /// left untouched, so literal braces in templates are safe.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = self.template.clone();
        for (key, value) in values {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }
}

const DECISION_TEMPLATE: &str = "\
You are an autonomous agent working towards the goal described in the \
conversation below. Decide the next action.

Conversation so far:
{messages}

Tools available: {tools}
Tools already executed this pass: {executed_tools}

Request the tool calls needed to make progress. If the goal has been \
reached, or no further progress is possible, call stop_workflow with a \
short reason. Do not stop while meaningful work remains.
{custom_instructions}";

const SUMMARY_TEMPLATE: &str = "\
Condense the following conversation into a short summary. Preserve \
decisions made, actions taken, their outcomes, and any outstanding work. \
Fold the previous summary in if one is present.

Messages:
{messages}

Reply with the summary text only.";

const FINISH_TEMPLATE: &str = "\
The workflow has ended at {current_time}. Review the full conversation \
and produce a report.

Conversation:
{messages}

Reply with a JSON object of the form:
{\"summary\": \"what was accomplished\", \"nextRecommendedAction\": \
\"prompt for a follow-up run\", \"secondsUntilNextWorkflow\": 3600}

Omit nextRecommendedAction and secondsUntilNextWorkflow when no \
follow-up run is warranted.";

/// Prompt set used by the workflow nodes. Defaults suit an unattended
/// agent; callers override per namespace as needed.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub decision: PromptTemplate,
    pub summary: PromptTemplate,
    pub finish: PromptTemplate,
    /// Extra instructions appended to the decision prompt.
    pub custom_instructions: Option<String>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            decision: PromptTemplate::new(DECISION_TEMPLATE),
            summary: PromptTemplate::new(SUMMARY_TEMPLATE),
            finish: PromptTemplate::new(FINISH_TEMPLATE),
            custom_instructions: None,
        }
    }
}

impl Prompts {
    pub fn with_custom_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.custom_instructions = Some(instructions.into());
        self
    }
}
