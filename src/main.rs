mod error;
mod logging;
mod mail_reader;
mod mailbox;
mod maildir;
mod read_state;
mod settings;
mod smtp;
mod web;


use anyhow::Context;
use log::info;
use mail_reader::message::MailParser;
use mail_reader::thumbnail::ImageThumbnailer;
use mailbox::Mailbox;
use maildir::writer::{MessageWriter, Ownership};
use maildir::Maildir;
use read_state::ReadStateStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = settings::load_settings()?;
    logging::init(&config.log_level)?;

    let maildir = Maildir::new(&config.base_path, &config.mail_user);
    maildir
        .ensure_layout()
        .await
        .with_context(|| format!("Cannot create Maildir at {}", maildir.root().display()))?;
    info!("Storing mail for any recipient in {}", maildir.root().display());

    let read_state = Arc::new(ReadStateStore::load(maildir.read_state_path()).await);
    let ownership = Ownership {
        uid: config.store_uid,
        gid: config.store_gid,
    };
    let writer = Arc::new(MessageWriter::new(&maildir, &config.mail_domain, ownership));
    let mailbox = Arc::new(Mailbox::new(
        maildir,
        writer.clone(),
        read_state,
        Arc::new(MailParser),
        Arc::new(ImageThumbnailer),
    ));

    tokio::select! {
        result = smtp::start_smtp_server(&config, writer) => result?,
        result = web::start_web_server(&config, mailbox) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
