//! The system prompt injected once at the head of every thread.

use chrono::{DateTime, SecondsFormat, Utc};

/// Built-in instructions; `[agent] system_prompt` replaces them.
pub const DEFAULT_INSTRUCTIONS: &str = "\
Du bist ein technischer Assistent mit Zugriff auf Microsoft-365- und Datenbank-Werkzeuge. \
Sprich Deutsch, antworte kurz und strukturiert.

Verfügbare Werkzeuge:
- \"mail.latestMessage.get\" und \"mail.message.fetch\" liefern Posteingangsdaten.
- Antworten und Versand laufen über \"mail.message.replyDraft\" bzw. \"mail.message.send\".
- Anhänge bearbeitest du mit \"mail.attachment.download\" oder \"mail.attachment.uploadAndAttach\".
- Termine verwaltest du mit den \"calendar.*\"-Werkzeugen.
- Excel-Daten liest und schreibst du über \"excel.workbook.*\". Gib Sheet-Namen an und \
nutze eine Session-ID nur, wenn Graph sie explizit geliefert hat.
- Datenbankfragen beantwortest du mit den \"postgres.*\"-Werkzeugen, sofern sie freigegeben \
sind. Verändere Daten nur auf ausdrücklichen Wunsch.
- Prüfe Verfügbarkeit und Token bei Fehlern mit \"graph.health.check\" oder \"graph.token.acquire\".

Arbeitsweise:
- Nutze nur freigegebene Werkzeuge und prüfe Parameter sorgfältig.
- Beschreibe Fehlermeldungen knapp und schlage konkrete nächste Schritte vor.
- Stoppe, sobald die Nutzeranforderung erfüllt ist.";

/// `Aktuelle UTC-Zeit: <iso>` followed by the instructions.
pub fn system_prompt(now: DateTime<Utc>, instructions: Option<&str>) -> String {
    let instructions = instructions
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS);
    format!(
        "Aktuelle UTC-Zeit: {}\n\n{instructions}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn prompt_starts_with_utc_time() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 0).unwrap();
        let prompt = system_prompt(now, None);
        assert!(prompt.starts_with("Aktuelle UTC-Zeit: 2026-03-09T14:05:00.000Z\n\n"));
        assert!(prompt.contains("calendar.*"));
    }

    #[test]
    fn override_replaces_instructions() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let prompt = system_prompt(now, Some("Antworte immer mit OK."));
        assert!(prompt.ends_with("\n\nAntworte immer mit OK."));
        assert!(!prompt.contains("mail.message.send"));

        // Blank overrides fall back to the built-in text.
        assert!(system_prompt(now, Some("  ")).contains("mail.message.send"));
    }
}
