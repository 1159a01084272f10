//! Boot-time provisioning script templating.
//!
//! The restore orchestrator delivers an opaque shell payload at launch. The
//! script itself runs on the instance (locate the data block device, create
//! a filesystem when needed, persist the mount, start services); the core's
//! only contract with it is substituting a small set of named placeholders
//! into a fixed body. Placeholders are spelled `{{name}}` and values are
//! shell-escaped on the way in.

use std::borrow::Cow;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use thiserror::Error;

/// Placeholder receiving the generated tenant identifier.
pub const TENANT_ID_PLACEHOLDER: &str = "tenant_id";

/// Default boot script: formats the data device on first boot, persists the
/// mount, records the tenant identifier, and starts supervised services.
pub const DEFAULT_TEMPLATE: &str = r#"#!/bin/bash -ex
exec > >(tee /var/log/user-data.log|logger -t user-data -s 2>/dev/console) 2>&1

avail_blk=`lsblk -n -oNAME,MOUNTPOINT | grep -v '/$' | grep -v 'xvda' | awk -F' ' '{print $1}'`
if [ -z "$avail_blk" ]; then
    echo 'no unmounted data block device present'
    exit 1
fi

update_needed=`file -s /dev/$avail_blk | awk -F':' '{print $2}'`
setup_fs=`echo "$update_needed" | egrep -e '^[[:space:]]+data$' | wc -l`

if [ $setup_fs -eq 1 ]; then
    echo "creating file system on /dev/$avail_blk"
    mkfs -t ext4 /dev/$avail_blk
fi
cp /etc/fstab /etc/fstab.orig
echo "/dev/$avail_blk /mnt/data ext4 defaults,nofail,nobootwait 0 2" >> /etc/fstab
mount -a
echo {{tenant_id}} > /etc/zapas-tenant
service supervisor start
supervisorctl start all
"#;

/// Errors raised while resolving or rendering a boot script.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BootScriptError {
    /// Raised when both inline and file sources are provided.
    #[error("boot script template cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline template is empty or only whitespace.
    #[error("boot script template must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("boot script template file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file resolves to empty or only whitespace.
    #[error("boot script template file must not be empty")]
    FileEmpty,
    /// Raised when reading the file source fails.
    #[error("failed to read boot script template `{path}`: {message}")]
    FileRead {
        /// Path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a value is supplied for a placeholder the template never
    /// mentions.
    #[error("template has no placeholder named `{name}`")]
    UnknownPlaceholder {
        /// Placeholder name that was supplied.
        name: String,
    },
    /// Raised when rendering leaves a placeholder without a value.
    #[error("placeholder `{name}` was not given a value")]
    UnresolvedPlaceholder {
        /// Placeholder name left in the rendered output.
        name: String,
    },
}

/// Substitutes named values into a template, shell-escaping each one.
///
/// Every supplied value must match a `{{name}}` placeholder in the template,
/// and no placeholder may remain after substitution: a boot script with a
/// literal `{{tenant_id}}` in it would fail silently on the instance, so
/// rendering fails loudly here instead.
///
/// # Errors
///
/// Returns [`BootScriptError::UnknownPlaceholder`] or
/// [`BootScriptError::UnresolvedPlaceholder`] as described above.
pub fn render(template: &str, values: &[(&str, &str)]) -> Result<String, BootScriptError> {
    let mut rendered = template.to_owned();
    for (name, value) in values {
        let token = format!("{{{{{name}}}}}");
        if !rendered.contains(&token) {
            return Err(BootScriptError::UnknownPlaceholder {
                name: (*name).to_owned(),
            });
        }
        let escaped = escape(Cow::from(*value));
        rendered = rendered.replace(&token, escaped.as_ref());
    }

    if let Some(name) = first_placeholder(&rendered) {
        return Err(BootScriptError::UnresolvedPlaceholder { name });
    }
    Ok(rendered)
}

/// Resolves a boot script template from either an inline value or a file.
///
/// Inline and file sources are mutually exclusive. Both values are trimmed
/// for emptiness checks, but the returned template preserves the original
/// content. Neither source present resolves to `None` so callers can fall
/// back to [`DEFAULT_TEMPLATE`].
///
/// # Errors
///
/// Returns [`BootScriptError`] when the inputs are invalid or the file
/// cannot be read.
pub fn resolve_template(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, BootScriptError> {
    if inline.is_some() && file.is_some() {
        return Err(BootScriptError::BothProvided);
    }

    if let Some(template) = inline {
        if template.trim().is_empty() {
            return Err(BootScriptError::InlineEmpty);
        }
        return Ok(Some(template.to_owned()));
    }

    let Some(path) = file else {
        return Ok(None);
    };

    if path.trim().is_empty() {
        return Err(BootScriptError::FilePathEmpty);
    }

    let content = read_template_file(path).map_err(|message| BootScriptError::FileRead {
        path: path.to_owned(),
        message,
    })?;

    if content.trim().is_empty() {
        return Err(BootScriptError::FileEmpty);
    }
    Ok(Some(content))
}

/// Returns the name of the first `{{name}}` placeholder left in `text`.
fn first_placeholder(text: &str) -> Option<String> {
    let start = text.find("{{")?;
    let rest = text.get(start.checked_add(2)?..)?;
    let end = rest.find("}}")?;
    rest.get(..end).map(str::to_owned)
}

/// Reads a template file through a capability scoped to its directory.
fn read_template_file(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
