//! Notification bodies. Each has a plain-text and an HTML rendering.

use super::Email;

const STYLE: &str = r#"body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; margin: 0; padding: 0; background: #f5f5f5; }
        .container { max-width: 600px; margin: 0 auto; padding: 40px 20px; }
        .card { background: white; border-radius: 8px; padding: 40px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
        h1 { color: #1a1a1a; margin-top: 0; font-size: 24px; }
        .button { display: inline-block; background: #b83280; color: white; padding: 12px 24px; border-radius: 6px; text-decoration: none; }
        .code { font-size: 28px; font-weight: bold; letter-spacing: 6px; color: #b83280; text-align: center; padding: 20px; background: #fdf2f8; border-radius: 8px; margin: 24px 0; font-family: 'SF Mono', Monaco, monospace; }
        .quote { border-left: 3px solid #b83280; padding-left: 16px; color: #555; white-space: pre-wrap; }
        .footer { margin-top: 32px; padding-top: 20px; border-top: 1px solid #eee; color: #888; font-size: 12px; }"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        {}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <h1>{}</h1>
            {}
            <div class="footer">You received this email because of activity on your Muse account.</div>
        </div>
    </div>
</body>
</html>"#,
        STYLE, title, body
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Invitation to register as a model. `expires_at` is already formatted.
pub fn invitation(to: &str, sender_name: &str, code: &str, frontend_url: &str, expires_at: &str) -> Email {
    let url = format!("{}/register?code={}&email={}", frontend_url, code, to);
    let text = format!(
        r#"{sender} has invited you to join Muse as a model.

Your invitation code is: {code}

Register here: {url}

This invitation expires on {expires}.

If you were not expecting this invitation, you can ignore this email."#,
        sender = sender_name,
        code = code,
        url = url,
        expires = expires_at,
    );
    let body = format!(
        r#"<p>{sender} has invited you to join Muse as a model.</p>
            <p>Your invitation code is:</p>
            <div class="code">{code}</div>
            <p style="text-align: center;"><a href="{url}" class="button">Accept Invitation</a></p>
            <p>This invitation expires on {expires}.</p>"#,
        sender = escape(sender_name),
        code = escape(code),
        url = escape(&url),
        expires = escape(expires_at),
    );
    Email {
        to: to.to_string(),
        subject: format!("{} has invited you to join Muse", sender_name),
        text,
        html: layout("You're invited!", &body),
    }
}

/// Sent after a model or admin account is created.
pub fn welcome(to: &str, name: &str, frontend_url: &str) -> Email {
    let text = format!(
        "Hi {},\n\nYour Muse account is ready. Sign in at {}/login to complete your profile.\n",
        name, frontend_url
    );
    let body = format!(
        r#"<p>Hi {},</p>
            <p>Your Muse account is ready. Sign in to complete your profile.</p>
            <p style="text-align: center;"><a href="{}/login" class="button">Sign in</a></p>"#,
        escape(name),
        escape(frontend_url)
    );
    Email {
        to: to.to_string(),
        subject: "Welcome to Muse".into(),
        text,
        html: layout("Welcome to Muse", &body),
    }
}

/// Credentials for a visitor account provisioned on first payment.
pub fn visitor_credentials(to: &str, username: &str, password: &str, frontend_url: &str) -> Email {
    let text = format!(
        r#"Thank you for your donation!

An account was created so you can get back to your unlocked photos.

Email: {to}
Username: {username}
Password: {password}

Sign in at {url}/login and change your password from your profile."#,
        to = to,
        username = username,
        password = password,
        url = frontend_url,
    );
    let body = format!(
        r#"<p>Thank you for your donation! An account was created so you can get back to your unlocked photos.</p>
            <p>Username: <strong>{username}</strong></p>
            <p>Your password:</p>
            <div class="code">{password}</div>
            <p style="text-align: center;"><a href="{url}/login" class="button">Sign in</a></p>
            <p>Change your password from your profile after signing in.</p>"#,
        username = escape(username),
        password = escape(password),
        url = escape(frontend_url),
    );
    Email {
        to: to.to_string(),
        subject: "Your Muse account".into(),
        text,
        html: layout("Welcome to Muse", &body),
    }
}

/// Fallback for a chat message whose recipient is not connected.
pub fn new_message(to: &str, sender_name: &str, content: &str, frontend_url: &str) -> Email {
    let text = format!(
        "{} sent you a message:\n\n{}\n\nReply at {}/messages\n",
        sender_name, content, frontend_url
    );
    let body = format!(
        r#"<p>{} sent you a message:</p>
            <p class="quote">{}</p>
            <p style="text-align: center;"><a href="{}/messages" class="button">Reply</a></p>"#,
        escape(sender_name),
        escape(content),
        escape(frontend_url)
    );
    Email {
        to: to.to_string(),
        subject: "You have received a message".into(),
        text,
        html: layout("New message", &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_carries_code_and_link() {
        let email = invitation("new@x.com", "Ada", "QZR-042", "http://app", "2026-01-01 10:00 UTC");
        assert!(email.text.contains("QZR-042"));
        assert!(email.text.contains("http://app/register?code=QZR-042&email=new@x.com"));
        assert!(email.html.contains("QZR-042"));
        assert!(email.subject.contains("Ada"));
    }

    #[test]
    fn message_content_is_escaped_in_html() {
        let email = new_message("m@x.com", "Vera", "<script>hi</script>", "http://app");
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
        assert!(email.text.contains("<script>hi</script>"));
    }
}
