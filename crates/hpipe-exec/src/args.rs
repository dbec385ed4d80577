//! Declarative property -> command-line flag tables.

use hpipe_core::flow::Props;

/// How a flag carries its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgForm {
    /// `-u value`: flag and value are two tokens.
    Separate,
    /// `--project=value`: value appended to the flag.
    Joined,
}

/// Maps one job property onto a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub prop: &'static str,
    pub flag: &'static str,
    pub form: ArgForm,
}

impl ArgSpec {
    pub const fn separate(prop: &'static str, flag: &'static str) -> Self {
        Self {
            prop,
            flag,
            form: ArgForm::Separate,
        }
    }

    pub const fn joined(prop: &'static str, flag: &'static str) -> Self {
        Self {
            prop,
            flag,
            form: ArgForm::Joined,
        }
    }
}

/// Required properties absent from `props`, in table order.
pub fn missing_props(props: &Props, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !props.contains_key(**name))
        .map(|name| name.to_string())
        .collect()
}

/// Build the argument vector in table order. Properties not set on the job
/// are left out.
pub fn prepare_arg_list(props: &Props, table: &[ArgSpec]) -> Vec<String> {
    let mut args = Vec::with_capacity(table.len() * 2);
    for spec in table {
        let Some(value) = props.get(spec.prop) else {
            continue;
        };
        match spec.form {
            ArgForm::Separate => {
                args.push(spec.flag.to_string());
                args.push(value.clone());
            }
            ArgForm::Joined => args.push(format!("{}{}", spec.flag, value)),
        }
    }
    args
}

/// Shell-like rendering of a command line for the audit log.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('\'') {
            line.push('\'');
            line.push_str(&arg.replace('\'', r"'\''"));
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[ArgSpec] = &[
        ArgSpec::separate("user", "-u"),
        ArgSpec::joined("project", "--project="),
        ArgSpec::separate("cmd", "-e"),
    ];

    fn props(pairs: &[(&str, &str)]) -> Props {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_props() {
        let p = props(&[("user", "ak"), ("cmd", "select 1")]);
        assert_eq!(missing_props(&p, &["user", "project", "cmd"]), vec!["project"]);
        assert!(missing_props(&p, &["user"]).is_empty());
    }

    #[test]
    fn test_prepare_follows_table_order_and_form() {
        let p = props(&[("cmd", "select 1;"), ("project", "wh"), ("user", "ak")]);
        assert_eq!(
            prepare_arg_list(&p, TABLE),
            vec!["-u", "ak", "--project=wh", "-e", "select 1;"]
        );
    }

    #[test]
    fn test_prepare_skips_unset_and_unknown() {
        let p = props(&[("cmd", "ls"), ("extra", "ignored")]);
        assert_eq!(prepare_arg_list(&p, TABLE), vec!["-e", "ls"]);
    }

    #[test]
    fn test_render_command_quotes() {
        let args = vec!["-e".to_string(), "select 1".to_string(), "it's".to_string()];
        assert_eq!(
            render_command("odpscmd", &args),
            r"odpscmd -e 'select 1' 'it'\''s'"
        );
    }
}
