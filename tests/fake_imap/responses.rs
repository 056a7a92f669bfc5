//! Response writers, one per supported command
//!
//! Every writer flushes after each line so the client never waits on a
//! buffered response.

use super::mailbox::Mailbox;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

pub async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> io::Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await
}

async fn write_lines<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    lines: &[String],
) -> io::Result<()> {
    for line in lines {
        write_line(stream, line).await?;
    }
    Ok(())
}

pub async fn capability<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) -> io::Result<()> {
    write_lines(
        stream,
        &[
            "* CAPABILITY IMAP4rev1 STARTTLS\r\n".to_string(),
            format!("{tag} OK CAPABILITY completed\r\n"),
        ],
    )
    .await
}

pub async fn ok<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    command: &str,
    stream: &mut BufReader<S>,
) -> io::Result<()> {
    write_line(stream, &format!("{tag} OK {command} completed\r\n")).await
}

/// SELECT: folder metadata, or NO when the folder does not exist.
/// Returns the selected folder name.
pub async fn select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> io::Result<Option<String>> {
    let Some(folder) = mailbox.folder(name) else {
        write_line(stream, &format!("{tag} NO Folder not found\r\n")).await?;
        return Ok(None);
    };

    write_lines(
        stream,
        &[
            "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n".to_string(),
            format!("* {} EXISTS\r\n", folder.uids.len()),
            "* 0 RECENT\r\n".to_string(),
            format!("* OK [UIDVALIDITY {}]\r\n", folder.uid_validity),
            format!("* OK [UIDNEXT {}]\r\n", folder.uid_next()),
            format!("{tag} OK [READ-WRITE] SELECT completed\r\n"),
        ],
    )
    .await?;
    Ok(Some(name.to_string()))
}

/// UID SEARCH. Only `ALL` is used by the engine, so every UID of the
/// selected folder matches.
pub async fn uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mailbox,
    selected: Option<&str>,
    stream: &mut BufReader<S>,
) -> io::Result<()> {
    let Some(folder) = selected.and_then(|name| mailbox.folder(name)) else {
        return write_line(stream, &format!("{tag} BAD No folder selected\r\n")).await;
    };

    let mut line = String::from("* SEARCH");
    for uid in &folder.uids {
        line.push(' ');
        line.push_str(&uid.to_string());
    }
    line.push_str("\r\n");

    write_lines(stream, &[line, format!("{tag} OK SEARCH completed\r\n")]).await
}

pub async fn logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) -> io::Result<()> {
    write_lines(
        stream,
        &[
            "* BYE\r\n".to_string(),
            format!("{tag} OK LOGOUT completed\r\n"),
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;

    /// Run a writer against an in-memory duplex stream and return what
    /// the client would read.
    async fn captured<F, Fut>(write: F) -> String
    where
        F: FnOnce(BufReader<tokio::io::DuplexStream>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (client, server) = tokio::io::duplex(4096);
        write(BufReader::new(server)).await;

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn select_reports_validity_and_uidnext() {
        let mailbox = MailboxBuilder::new().folder("INBOX").uids([3, 7]).build();

        let out = captured(|mut stream| async move {
            let selected = select("A1", "INBOX", &mailbox, &mut stream).await.unwrap();
            assert_eq!(selected.as_deref(), Some("INBOX"));
        })
        .await;

        assert!(out.contains("* 2 EXISTS\r\n"));
        assert!(out.contains("[UIDVALIDITY 1]"));
        assert!(out.contains("[UIDNEXT 8]"));
        assert!(out.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn select_missing_folder_is_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let out = captured(|mut stream| async move {
            let selected = select("A1", "Nope", &mailbox, &mut stream).await.unwrap();
            assert!(selected.is_none());
        })
        .await;

        assert_eq!(out, "A1 NO Folder not found\r\n");
    }

    #[tokio::test]
    async fn search_lists_every_uid() {
        let mailbox = MailboxBuilder::new().folder("INBOX").uids([1, 2, 5]).build();

        let out = captured(|mut stream| async move {
            uid_search("A2", &mailbox, Some("INBOX"), &mut stream)
                .await
                .unwrap();
        })
        .await;

        assert_eq!(out, "* SEARCH 1 2 5\r\nA2 OK SEARCH completed\r\n");
    }

    #[tokio::test]
    async fn search_without_selection_is_bad() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let out = captured(|mut stream| async move {
            uid_search("A3", &mailbox, None, &mut stream).await.unwrap();
        })
        .await;

        assert_eq!(out, "A3 BAD No folder selected\r\n");
    }
}
