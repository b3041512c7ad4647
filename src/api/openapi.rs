use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};

/// Base document built from Cargo metadata, shared by both HTTP surfaces.
pub(crate) fn cargo_openapi(title: &str) -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(title)
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

pub(crate) fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_with_email() {
        assert_eq!(
            parse_author("Team Sshauth <team@sshauth.dev>"),
            (Some("Team Sshauth"), Some("team@sshauth.dev"))
        );
    }

    #[test]
    fn parse_author_name_only() {
        assert_eq!(parse_author("  Jane  "), (Some("Jane"), None));
        assert_eq!(parse_author(""), (None, None));
    }

    #[test]
    fn document_uses_cargo_metadata() {
        let doc = cargo_openapi("verification");
        assert_eq!(doc.info.title, "verification");
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert!(doc.info.license.is_some());
    }
}
