use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Token<'a> {
	Word(&'a str),
	Pipe,
	RedirIn,
	RedirOut,
	Background,
}

impl<'a> Token<'a> {
	pub fn from_word(word: &'a str) -> Token<'a> {
		match word {
			"|" => Token::Pipe,
			"<" => Token::RedirIn,
			">" => Token::RedirOut,
			"&" => Token::Background,
			_ => Token::Word(word),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Command<'a> {
	/// `argv[0]` is the program name; the parser never builds an empty one.
	pub argv: Vec<&'a str>,
	pub input: Option<&'a str>,
	pub output: Option<&'a str>,
}

impl<'a> Command<'a> {
	pub fn name(&self) -> &'a str {
		self.argv.first().copied().unwrap_or("")
	}

	pub fn arguments(&self) -> &[&'a str] {
		self.argv.get(1..).unwrap_or(&[])
	}
}

impl<'a> fmt::Display for Command<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.argv.join(" "))?;
		if let Some(input) = self.input {
			write!(f, " < {}", input)?;
		}
		if let Some(output) = self.output {
			write!(f, " > {}", output)?;
		}
		Ok(())
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline<'a> {
	pub commands: Vec<Command<'a>>,
	pub is_background: bool,
}

/// Renders the job text shown in notifications; the trailing `&` is left out.
impl<'a> fmt::Display for Pipeline<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, command) in self.commands.iter().enumerate() {
			if i != 0 {
				f.write_str(" | ")?;
			}
			write!(f, "{}", command)?;
		}
		Ok(())
	}
}
