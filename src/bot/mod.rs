//! # Bot Module
//!
//! Discord front end for the playback core.
//!
//! - Command registration ([`commands`]) and dispatch ([`handlers`])
//! - "Now playing" messages per session ([`announcer`])
//! - Voice state tracking: when the bot is removed from its voice channel
//!   the guild's session is told the connection is gone.
//!
//! All playback state lives in [`AudioPlayer`]; this module only translates
//! Discord events into player calls and player results into replies.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod announcer;
pub mod commands;
pub mod handlers;

use crate::{audio::player::AudioPlayer, config::Config};

/// Event handler registered with the serenity client.
pub struct MusicBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Per-guild sessions and the resolver behind `/play`
    pub player: AudioPlayer,
}

impl MusicBot {
    pub fn new(config: Config, player: AudioPlayer) -> Self {
        Self {
            config: Arc::new(config),
            player,
        }
    }

    /// Registers slash commands globally, or on the development guild when
    /// `GUILD_ID` is set.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild ({}). Verifica el permiso 'applications.commands'.",
                        e
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos globales ({}). Verifica el permiso 'applications.commands'.",
                        e
                    )
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detecta cuando el bot es expulsado o desconectado del canal de voz.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id.or(old.and_then(|o| o.guild_id)) {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.player.connection_lost(guild_id);
            }
        }
    }
}
