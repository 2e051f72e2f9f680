//! Shell command parsing.

use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Signup {
        email: String,
        date_of_birth: String,
        name: String,
    },
    Signin {
        email: String,
    },
    /// Finish whichever sign-up or sign-in has a code outstanding
    Code {
        otp: String,
    },
    Cancel,
    Whoami,
    List,
    Show {
        id: String,
    },
    /// Content follows on the next lines, terminated by a lone `.`
    Create {
        title: String,
    },
    Delete {
        id: String,
    },
    Signout,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  signup <email> <YYYY-MM-DD> <name...>   request a signup code, then enter it
  signin <email>                          request a signin code, then enter it
  code <otp>                              enter the emailed code for the pending signup or signin
  cancel                                  abandon the pending signup or signin
  whoami                                  show the signed-in user
  list                                    list your notes
  show <id>                               print one note
  create <title...>                       create a note; type the content, end with a lone '.'
  delete <id>                             delete a note
  signout                                 end the session
  help                                    show this message
  quit                                    exit";

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let command = match (verb, rest.as_slice()) {
            ("signup", [email, dob, name @ ..]) if !name.is_empty() => Command::Signup {
                email: email.to_string(),
                date_of_birth: dob.to_string(),
                name: name.join(" "),
            },
            ("signup", _) => bail!("usage: signup <email> <YYYY-MM-DD> <name...>"),
            ("signin", [email]) => Command::Signin {
                email: email.to_string(),
            },
            ("signin", _) => bail!("usage: signin <email>"),
            ("code", [otp]) => Command::Code {
                otp: otp.to_string(),
            },
            ("code", _) => bail!("usage: code <otp>"),
            ("cancel", []) => Command::Cancel,
            ("whoami", []) => Command::Whoami,
            ("list" | "ls", []) => Command::List,
            ("show", [id]) => Command::Show { id: id.to_string() },
            ("show", _) => bail!("usage: show <id>"),
            ("create", title) if !title.is_empty() => Command::Create {
                title: title.join(" "),
            },
            ("create", _) => bail!("usage: create <title...>"),
            ("delete" | "rm", [id]) => Command::Delete { id: id.to_string() },
            ("delete" | "rm", _) => bail!("usage: delete <id>"),
            ("signout" | "logout", []) => Command::Signout,
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            (verb, _) => bail!("unknown command {verb:?}, try 'help'"),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_nothing() {
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_signup_joins_name() {
        assert_eq!(
            Command::parse("signup ada@example.com 1990-04-01 Ada  Lovelace").unwrap(),
            Some(Command::Signup {
                email: "ada@example.com".into(),
                date_of_birth: "1990-04-01".into(),
                name: "Ada Lovelace".into(),
            })
        );
        assert!(Command::parse("signup ada@example.com 1990-04-01").is_err());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Command::parse("ls").unwrap(), Some(Command::List));
        assert_eq!(
            Command::parse("rm n3").unwrap(),
            Some(Command::Delete { id: "n3".into() })
        );
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_code_takes_one_word() {
        assert_eq!(
            Command::parse("code 123456").unwrap(),
            Some(Command::Code {
                otp: "123456".into()
            })
        );
        assert!(Command::parse("code").is_err());
        assert!(Command::parse("code 123 456").is_err());
        assert_eq!(Command::parse("cancel").unwrap(), Some(Command::Cancel));
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(Command::parse("show").is_err());
        assert!(Command::parse("signin a@b.com extra").is_err());
        assert!(Command::parse("create").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }
}
