use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::Discord;
use crate::notify::Notice;

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;
const ORANGE: u32 = 15105570;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordManager {
    client: Client,
    origin: String,
}

impl DiscordManager {
    pub fn new(client: Client, origin: String) -> Self {
        Self { client, origin }
    }

    pub fn build_embed(&self, notice: &Notice) -> Embed {
        let (title, description, color, fields) = match notice {
            Notice::Removed {
                class,
                key,
                name,
                account_id,
            } => (
                "🔴 App Removed",
                format!("**{name}** is no longer available on the store"),
                RED,
                vec![
                    EmbedField::inline("Bundle ID", format!("`{key}`")),
                    EmbedField::inline("Monitor", class),
                    EmbedField::inline("Account", account_id.as_deref().unwrap_or("-")),
                ],
            ),
            Notice::Recovered {
                class,
                key,
                name,
                account_id,
            } => (
                "✅ App Available Again",
                format!("**{name}** is back on the store"),
                GREEN,
                vec![
                    EmbedField::inline("Bundle ID", format!("`{key}`")),
                    EmbedField::inline("Monitor", class),
                    EmbedField::inline("Account", account_id.as_deref().unwrap_or("-")),
                ],
            ),
            Notice::SyncAborted {
                class,
                active,
                floor,
            } => (
                "⚠️ Registry Sync Aborted",
                "The registry returned no entities. Nothing was archived.".to_string(),
                ORANGE,
                vec![
                    EmbedField::inline("Monitor", class),
                    EmbedField::inline("Active", active),
                    EmbedField::inline("Floor", floor),
                ],
            ),
        };

        Embed {
            title: Some(title.to_string()),
            description: Some(description),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("storewatch | {}", self.origin),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn build_message(&self, discord: &Discord, notice: &Notice) -> Message {
        let mut message_builder = MessageBuilder::new().add_embed(self.build_embed(notice));
        if let Some(user_id) = &discord.user_id {
            message_builder =
                message_builder.content(format!("{} <@{user_id}>", notice.headline()));
        }
        message_builder.build()
    }

    #[instrument(skip(self, discord, message))]
    pub async fn send_message(&self, discord: &Discord, message: &Message) {
        match self.client.post(&discord.url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent Discord message");
                } else {
                    error!("Discord message failed with status: {}", response.status());
                    if let Ok(error_text) = response.text().await {
                        error!("Discord API error response: {}", error_text);
                    }
                }
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
            }
        }
    }
}
