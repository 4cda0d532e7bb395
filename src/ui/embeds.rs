use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{
    session::{SessionSnapshot, SessionState},
    track::Track,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 guildtune";

/// Máximo de canciones listadas en `/queue`
const QUEUE_PREVIEW: usize = 10;

/// Crea un embed para una canción recién agregada
pub fn create_track_added_embed(track: &Track, position: Option<usize>) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("➕ Agregado a la cola")
        .description(format!("Added **{}** to the queue.", track.title()))
        .color(colors::SUCCESS_GREEN);

    embed = match position {
        Some(position) => embed.field("📍 Posición", position.to_string(), true),
        None => embed.field("📍 Posición", "Sonando ahora", true),
    };

    if let Some(url) = track.page_url() {
        embed = embed.url(url);
    }

    embed
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    let Some(current) = &snapshot.current else {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    };

    let status = match (snapshot.state, snapshot.loop_enabled) {
        (SessionState::Paused, _) => "⏸️ Pausado",
        (_, true) => "🔂 Reproduciendo",
        _ => "▶️ Reproduciendo",
    };

    let mut embed = embed.field(status, format!("**{}**", current), false);

    let upcoming = upcoming_lines(&snapshot.pending);
    if !upcoming.is_empty() {
        embed = embed.field("Próximas canciones", upcoming, false);
    }

    embed
        .field(
            "Información",
            format!(
                "**Pendientes:** {} • **Volumen:** {}% • **Loop:** {}",
                snapshot.pending.len(),
                (snapshot.volume * 100.0).round() as u32,
                if snapshot.loop_enabled { "on" } else { "off" }
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn upcoming_lines(pending: &[Track]) -> String {
    let mut lines: Vec<String> = pending
        .iter()
        .take(QUEUE_PREVIEW)
        .enumerate()
        .map(|(i, track)| format!("**{}**. {}", i + 1, track))
        .collect();

    if pending.len() > QUEUE_PREVIEW {
        lines.push(format!("… y {} más", pending.len() - QUEUE_PREVIEW));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_upcoming_lines_numbered() {
        let pending = vec![
            Track::new("Uno", "u1").with_duration(Duration::from_secs(61)),
            Track::new("Dos", "u2"),
        ];
        assert_eq!(upcoming_lines(&pending), "**1**. Uno (1:01)\n**2**. Dos");
        assert_eq!(upcoming_lines(&[]), "");
    }

    #[test]
    fn test_upcoming_lines_truncated() {
        let pending: Vec<Track> = (0..13)
            .map(|i| Track::new(format!("T{}", i), format!("u{}", i)))
            .collect();
        let lines = upcoming_lines(&pending);

        assert_eq!(lines.lines().count(), QUEUE_PREVIEW + 1);
        assert!(lines.ends_with("… y 3 más"));
    }
}
