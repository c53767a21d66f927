use crate::errors::ShellError;
use crate::types::*;

type ParseResult<T> = Result<T, ShellError>;

/// Upper bound on the words of a single command.
pub const MAX_ARGS: usize = 100;

/// Splits a line on whitespace. Operators must stand alone as words.
pub fn tokenize(line: &str) -> Vec<Token> {
	line.split_whitespace().map(Token::from_word).collect()
}

fn malformed<T>(msg: &str) -> ParseResult<T> {
	Err(ShellError::MalformedPipeline(msg.to_string()))
}

struct Builder<'t, 'a> {
	tokens: &'t [Token<'a>],
	i: usize,
}

impl<'t, 'a> Builder<'t, 'a> {
	fn peek(&self) -> Option<Token<'a>> {
		self.tokens.get(self.i).cloned()
	}

	fn parse_redirect_target(&mut self) -> ParseResult<&'a str> {
		self.i += 1;
		match self.peek() {
			Some(Token::Word(target)) => {
				self.i += 1;
				Ok(target)
			},
			Some(_) => malformed("redirection target must be a word"),
			None => malformed("missing redirection target"),
		}
	}

	fn parse_command(&mut self) -> ParseResult<Command<'a>> {
		let mut argv: Vec<&'a str> = vec![];
		let mut input = None;
		let mut output = None;

		loop {
			match self.peek() {
				Some(Token::Word(word)) => {
					if argv.len() == MAX_ARGS {
						return Err(ShellError::TooManyArguments(MAX_ARGS));
					}
					argv.push(word);
					self.i += 1;
				},
				Some(Token::RedirIn) => input = Some(self.parse_redirect_target()?),
				Some(Token::RedirOut) => output = Some(self.parse_redirect_target()?),
				Some(Token::Pipe) | Some(Token::Background) | None => { break; },
			}
		}

		if argv.is_empty() {
			return malformed("empty command");
		}
		Ok(Command { argv: argv, input: input, output: output })
	}

	fn parse_pipeline(&mut self) -> ParseResult<Pipeline<'a>> {
		let mut commands: Vec<Command<'a>> = vec![];
		let mut is_background = false;

		loop {
			commands.push(self.parse_command()?);
			match self.peek() {
				Some(Token::Pipe) => { self.i += 1; },
				Some(Token::Background) => {
					self.i += 1;
					if self.i != self.tokens.len() {
						return malformed("'&' must end the line");
					}
					is_background = true;
					break;
				},
				Some(_) => unreachable!("parse_command stops only at a separator"),
				None => { break; },
			}
		}
		Ok(Pipeline { commands: commands, is_background: is_background })
	}
}

/// Groups tokens into a pipeline, one command per `|`-separated segment.
pub fn build<'a>(tokens: &[Token<'a>]) -> ParseResult<Pipeline<'a>> {
	let mut builder = Builder { tokens: tokens, i: 0 };
	builder.parse_pipeline()
}

/// Parses one input line. A blank line yields `None`.
pub fn parse(line: &str) -> ParseResult<Option<Pipeline>> {
	let tokens = tokenize(line);
	if tokens.is_empty() {
		return Ok(None);
	}
	build(&tokens).map(Some)
}
