use cabbot_core::domain::driver::{DriverPage, DriverRecord};
use serde::Serialize;

pub const MORE_DRIVERS_ACTION: &str = "drivers.more.v1";
pub const RESET_SESSION_ACTION: &str = "session.reset.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
    Divider { block_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn divider(mut self, block_id: impl Into<String>) -> Self {
        self.blocks.push(Block::Divider { block_id: block_id.into() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Plain reply text as a single section; used for everything except driver lists.
pub fn text_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text.to_owned())
        .section("cab.reply.text.v1", |section| {
            section.mrkdwn(text);
        })
        .build()
}

pub fn pickup_prompt_message() -> MessageTemplate {
    let text = "🚗 Tell me your pickup location!\nExample: `/cab I need drivers in Jaipur`";
    MessageBuilder::new(text)
        .section("cab.prompt.pickup.v1", |section| {
            section.mrkdwn(text);
        })
        .build()
}

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("Cab command help")
        .section("cab.help.summary.v1", |section| {
            section.mrkdwn(
                "*Find a driver*\n• `/cab I need drivers in Jaipur`\n• `/cab drivers who speak Hindi`\n• `/cab more` for the next page\n• `/cab reset` to start over",
            );
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("cab.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("cab.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

/// One section per driver plus paging controls. `fallback_text` carries the plain rendering.
pub fn driver_list_message(page: &DriverPage, fallback_text: &str) -> MessageTemplate {
    let filters = page.query.filters().describe();
    let mut builder = MessageBuilder::new(fallback_text.to_owned())
        .section("cab.drivers.header.v1", |section| {
            section.mrkdwn(format!(
                "🚗 *{} driver{}* for _{filters}_ (page {})",
                page.drivers.len(),
                if page.drivers.len() == 1 { "" } else { "s" },
                page.query.page
            ));
        })
        .divider("cab.drivers.divider.v1");

    for (index, driver) in page.drivers.iter().enumerate() {
        builder = builder.section(format!("cab.drivers.item.{}.v1", index + 1), |section| {
            section.mrkdwn(driver_card(driver));
        });
    }

    builder
        .actions("cab.drivers.actions.v1", |actions| {
            if page.has_more {
                actions.button(
                    ButtonElement::new(MORE_DRIVERS_ACTION, "Show more")
                        .style(ButtonStyle::Primary)
                        .value("more"),
                );
            }
            actions.button(
                ButtonElement::new(RESET_SESSION_ACTION, "Reset")
                    .style(ButtonStyle::Danger)
                    .value("reset"),
            );
        })
        .build()
}

fn driver_card(driver: &DriverRecord) -> String {
    let mut lines = vec![format!("*{}*", driver.name)];
    if let Some(city) = &driver.city {
        lines.push(format!("📍 {city}"));
    }
    if !driver.languages.is_empty() {
        lines.push(format!("🗣️ {}", driver.languages.join(", ")));
    }
    if let Some(vehicle) = driver.vehicles.first() {
        let cost = driver
            .lowest_per_km_cost()
            .map(|cost| format!(" · ₹{cost}/km"))
            .unwrap_or_default();
        lines.push(format!("🚘 {} {}{cost}", vehicle.model, vehicle.vehicle_type).trim().to_owned());
    }
    if let Some(phone) = &driver.phone {
        lines.push(format!("📞 {phone}"));
    }
    lines.join("\n")
}
