use crate::error::{Result, StoreError};
use crate::mail_reader::message::Attachment;
use crate::mail_reader::thumbnail::THUMBNAIL_BOX;
use crate::mailbox::Mailbox;

impl Mailbox {
    /// Attachment `index` in parse order.
    pub async fn get_attachment(&self, id: &str, index: usize) -> Result<Attachment> {
        let (_, raw) = self.read_located(id).await?;
        let mut parsed = self.reader.parser().parse(&raw)?;
        if index >= parsed.attachments.len() {
            return Err(StoreError::NotFound(format!(
                "attachment {} of message {} ({} attachments)",
                index,
                id,
                parsed.attachments.len()
            )));
        }
        Ok(parsed.attachments.swap_remove(index))
    }

    /// PNG preview of an image attachment, at most 200x200.
    pub async fn get_thumbnail(&self, id: &str, index: usize) -> Result<Vec<u8>> {
        let attachment = self.get_attachment(id, index).await?;
        if !attachment.is_image() {
            return Err(StoreError::NotAnImage(format!(
                "{} is {}",
                attachment.filename, attachment.content_type
            )));
        }

        let renderer = self.thumbnails.clone();
        tokio::task::spawn_blocking(move || renderer.render(&attachment.content, THUMBNAIL_BOX))
            .await
            .map_err(|e| StoreError::Render(e.to_string()))?
    }
}
