//! `toolwright render`: markdown from stdin to HTML on stdout.

use std::io::{BufRead, Read};

use anyhow::Context;
use toolwright_render::{AutoParagraph, IncrementalRenderer, render};

pub fn run(incremental: bool, no_auto_paragraph: bool) -> anyhow::Result<()> {
    let stdin = std::io::stdin();

    if incremental {
        let mut renderer = IncrementalRenderer::default();
        for line in stdin.lock().lines() {
            let line = line.context("Failed to read stdin")?;
            renderer.push(&format!("{line}\n"));
        }
        println!("{}", renderer.finish());
        return Ok(());
    }

    let mut text = String::new();
    stdin
        .lock()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    let mode = if no_auto_paragraph {
        AutoParagraph::Never
    } else {
        AutoParagraph::Fallback
    };
    println!("{}", render(&text, mode));
    Ok(())
}
