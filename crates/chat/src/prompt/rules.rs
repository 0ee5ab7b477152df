//! Built-in prompt rule sets.

use convogen_core::CompletionMode;

use crate::request::AppMode;

/// A section of the system prompt, appended in rule order when its
/// precondition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSection {
    /// Requires retrieved context.
    Context,
    /// Requires a non-empty pre-prompt.
    PrePrompt,
    /// Requires a memory window.
    Histories,
}

/// Texts and ordering for one family of models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRules {
    pub name: &'static str,
    pub context_prompt: &'static str,
    pub histories_prompt: &'static str,
    pub query_prompt: &'static str,
    pub system_prompt_orders: &'static [PromptSection],
    pub human_prefix: &'static str,
    pub assistant_prefix: &'static str,
    pub stops: &'static [&'static str],
}

const COMMON_CONTEXT_PROMPT: &str = "Use the following context as your learned knowledge, inside <context></context> XML tags.\n\n\
<context>\n{{#context#}}\n</context>\n\n\
When answer to user:\n\
- If you don't know, just say that you don't know.\n\
- If you don't know when you are not sure, ask for clarification.\n\
Avoid mentioning that you obtained the information from the context.\n\
And answer according to the language of the user's question.\n\n";

const BAICHUAN_CONTEXT_PROMPT: &str = "用户在与一个客观的助手对话。助手会尊重找到的材料，给出全面专业的解释，但不会过度演绎。同时回答中不会暴露引用的材料：\n\n\
```\n{{#context#}}\n```\n\n";

pub const COMMON_CHAT: PromptRules = PromptRules {
    name: "common_chat",
    context_prompt: COMMON_CONTEXT_PROMPT,
    histories_prompt: "Here is the chat histories between human and assistant, inside <histories></histories> XML tags.\n\n\
<histories>\n{{#histories#}}\n</histories>\n\n",
    query_prompt: "\n\nHuman: {{#query#}}\n\nAssistant: ",
    system_prompt_orders: &[PromptSection::Context, PromptSection::PrePrompt, PromptSection::Histories],
    human_prefix: "Human",
    assistant_prefix: "Assistant",
    stops: &["\nHuman:", "</histories>"],
};

pub const COMMON_COMPLETION: PromptRules = PromptRules {
    name: "common_completion",
    context_prompt: COMMON_CONTEXT_PROMPT,
    histories_prompt: "",
    query_prompt: "{{#query#}}",
    system_prompt_orders: &[PromptSection::Context, PromptSection::PrePrompt],
    human_prefix: "Human",
    assistant_prefix: "Assistant",
    stops: &[],
};

pub const BAICHUAN_CHAT: PromptRules = PromptRules {
    name: "baichuan_chat",
    context_prompt: BAICHUAN_CONTEXT_PROMPT,
    histories_prompt: "用户和助手的历史对话内容如下：\n```\n{{#histories#}}\n```\n\n",
    query_prompt: "\n\n用户：{{#query#}}",
    system_prompt_orders: &[PromptSection::Context, PromptSection::PrePrompt, PromptSection::Histories],
    human_prefix: "用户",
    assistant_prefix: "助手",
    stops: &["用户："],
};

pub const BAICHUAN_COMPLETION: PromptRules = PromptRules {
    name: "baichuan_completion",
    context_prompt: BAICHUAN_CONTEXT_PROMPT,
    histories_prompt: "",
    query_prompt: "{{#query#}}",
    system_prompt_orders: &[PromptSection::Context, PromptSection::PrePrompt],
    human_prefix: "用户",
    assistant_prefix: "助手",
    stops: &[],
};

impl PromptRules {
    /// Pick the rule set for an app mode, provider and model.
    ///
    /// Baichuan models get their own rules whichever provider serves them.
    pub fn resolve(app_mode: AppMode, provider: &str, model: &str) -> &'static PromptRules {
        let baichuan = provider.eq_ignore_ascii_case("baichuan")
            || model.to_ascii_lowercase().contains("baichuan");
        match (app_mode, baichuan) {
            (AppMode::Chat, false) => &COMMON_CHAT,
            (AppMode::Completion, false) => &COMMON_COMPLETION,
            (AppMode::Chat, true) => &BAICHUAN_CHAT,
            (AppMode::Completion, true) => &BAICHUAN_COMPLETION,
        }
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.iter().map(|s| s.to_string()).collect()
    }

    /// Whether the query is rendered into the prompt text itself.
    ///
    /// Chat models get the query as its own user message instead.
    pub fn query_in_prompt(model_mode: CompletionMode) -> bool {
        model_mode == CompletionMode::Completion
    }
}
