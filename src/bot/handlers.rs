use anyhow::{Context as _, Result};
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{error, info, warn};

use super::{announcer, MusicBot};
use crate::{
    audio::{session::EnqueueOutcome, sink::AudioSink, songbird_sink::SongbirdSink},
    error::{PlayerError, PlayerResult},
    ui::embeds,
};

/// Respuesta de un comando que no es `/play`
enum Reply {
    Text(String),
    Embed(CreateEmbed),
}

impl Reply {
    fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(
            ctx,
            &command,
            Err(PlayerError::IllegalTransition("este comando solo funciona en servidores")),
        )
        .await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let player = &bot.player;
    let reply = match command.data.name.as_str() {
        "play" => return handle_play(ctx, &command, bot, guild_id).await,
        "pause" => player
            .pause(guild_id)
            .await
            .map(|_| Reply::text("⏸️ Música pausada")),
        "resume" => player
            .resume(guild_id)
            .await
            .map(|_| Reply::text("▶️ Música reanudada")),
        "skip" => player
            .skip(guild_id)
            .await
            .map(|track| Reply::text(format!("⏭️ Saltada: **{}**", track.title()))),
        "stop" => {
            let result = player.stop(guild_id).await;
            leave_voice(ctx, guild_id).await;
            result.map(|_| Reply::text("⏹️ Música detenida y cola limpiada"))
        }
        "volume" => match integer_option(&command, "level") {
            Some(level) => player
                .set_volume(guild_id, level)
                .await
                .map(|_| Reply::text(format!("🔊 Volumen ajustado a {}%", level))),
            None => Err(PlayerError::InvalidParameter("falta el nivel de volumen".into())),
        },
        "nowplaying" => Ok(match player.now_playing(guild_id).as_str() {
            "none" => Reply::text("😴 No hay nada reproduciéndose"),
            title => Reply::text(format!("🎵 Reproduciendo: **{}**", title)),
        }),
        "loop" => player
            .toggle_loop(guild_id)
            .await
            .map(|enabled| Reply::text(loop_message(enabled))),
        "clear" => player
            .clear(guild_id)
            .await
            .map(|removed| Reply::text(clear_message(removed))),
        "queue" => Ok(match player.queue(guild_id).await {
            Some(snapshot) => Reply::Embed(embeds::create_queue_embed(&snapshot)),
            None => Reply::text("😴 La cola está vacía"),
        }),
        _ => Err(PlayerError::IllegalTransition("comando no reconocido")),
    };

    respond(ctx, &command, reply).await
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(query) = string_option(command, "query") else {
        return respond(
            ctx,
            command,
            Err(PlayerError::InvalidParameter("falta la búsqueda".into())),
        )
        .await;
    };

    // Verificar que el usuario esté en un canal de voz
    let Some(voice_channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(
            ctx,
            command,
            Err(PlayerError::IllegalTransition(
                "Debes estar en un canal de voz para reproducir música",
            )),
        )
        .await;
    };

    // Defer la respuesta ya que la búsqueda puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let embed = match play(ctx, command, bot, guild_id, voice_channel_id, &query).await {
        Ok(embed) => embed,
        Err(e) => {
            warn!("❌ /play falló en guild {}: {:#}", guild_id, e);
            embeds::create_error_embed("No se pudo reproducir", &format!("{:#}", e))
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
    voice_channel_id: ChannelId,
    query: &str,
) -> Result<CreateEmbed> {
    // Buscar antes de conectar: una búsqueda fallida no deja al bot en el canal
    let track = bot.player.resolve(query).await?;

    let manager = songbird::get(ctx)
        .await
        .context("Songbird no inicializado")?;

    // Conectar al canal de voz si no está conectado
    let existing = match manager.get(guild_id) {
        Some(call) => {
            let connected = call.lock().await.current_channel().is_some();
            connected.then_some(call)
        }
        None => None,
    };
    let call = match existing {
        Some(call) => call,
        None => {
            let call = manager
                .join(guild_id, voice_channel_id)
                .await
                .context("Error al conectar al canal de voz")?;
            info!("🔊 Conectado al canal de voz en guild {}", guild_id);
            call
        }
    };

    let outcome = bot
        .player
        .enqueue(guild_id, track, || {
            Box::new(SongbirdSink::new(guild_id, call.clone(), manager.clone())) as Box<dyn AudioSink>
        })
        .await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            // Sin sesión nadie libera la conexión
            if !bot.player.has_session(guild_id) {
                leave_voice(ctx, guild_id).await;
            }
            return Err(e.into());
        }
    };

    if let Some(events) = outcome.events {
        announcer::spawn(
            events,
            announcer::TextChannel::new(ctx.http.clone(), command.channel_id),
        );
    }

    let position = match outcome.queued {
        EnqueueOutcome::Started => None,
        EnqueueOutcome::Queued(position) => Some(position),
    };
    Ok(embeds::create_track_added_embed(&outcome.track, position))
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    reply: PlayerResult<Reply>,
) -> Result<()> {
    let message = match reply {
        Ok(Reply::Text(content)) => CreateInteractionResponseMessage::new().content(content),
        Ok(Reply::Embed(embed)) => CreateInteractionResponseMessage::new().embed(embed),
        Err(e) if e.is_notice() => CreateInteractionResponseMessage::new()
            .content(format!("ℹ️ {}", e))
            .ephemeral(true),
        Err(e) => {
            error!("❌ /{} falló: {}", command.data.name, e);
            CreateInteractionResponseMessage::new()
                .embed(embeds::create_error_embed("Error", &e.to_string()))
                .ephemeral(true)
        }
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;

    Ok(())
}

/// Sale del canal de voz aunque no hubiera sesión activa.
async fn leave_voice(ctx: &Context, guild_id: GuildId) {
    let Some(manager) = songbird::get(ctx).await else {
        return;
    };
    if manager.get(guild_id).is_some() {
        if let Err(e) = manager.remove(guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {}", guild_id, e);
        }
    }
}

// Funciones auxiliares

fn loop_message(enabled: bool) -> &'static str {
    if enabled {
        "🔂 Repetir canción activado"
    } else {
        "➡️ Repetición desactivada"
    }
}

fn clear_message(removed: usize) -> String {
    match removed {
        0 => "🗑️ La cola ya estaba vacía".to_string(),
        1 => "🗑️ Cola limpiada (1 canción eliminada)".to_string(),
        n => format!("🗑️ Cola limpiada ({} canciones eliminadas)", n),
    }
}

fn string_option(command: &CommandInteraction, name: &str) -> Option<String> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .map(str::to_string)
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_loop_message() {
        assert_eq!(loop_message(true), "🔂 Repetir canción activado");
        assert_eq!(loop_message(false), "➡️ Repetición desactivada");
    }

    #[test]
    fn test_clear_message_counts() {
        assert_eq!(clear_message(0), "🗑️ La cola ya estaba vacía");
        assert_eq!(clear_message(1), "🗑️ Cola limpiada (1 canción eliminada)");
        assert_eq!(clear_message(4), "🗑️ Cola limpiada (4 canciones eliminadas)");
    }
}
