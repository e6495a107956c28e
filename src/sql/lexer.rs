//! Hand-written scanner for the command language.
//!
//! The scanner is a table of mutually-recursive state functions: each one
//! consumes leading whitespace, matches a keyword, identifier or literal,
//! emits a token, and returns the next state (or `None` to stop). Grammar
//! dispatch is by the first letter(s) of the lower-cased input, so a
//! statement commits to one shape after a handful of characters. On the
//! first unmatched token the scanner emits a single error token and halts;
//! there is no recovery or resync.

/// Identifies the type of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Scan failed; the token text carries the message.
    Error,
    /// Last token of every successful scan.
    Eof,
    // commands
    Status,
    Stop,
    Close,
    // sql keywords and punctuation
    Table,
    Column,
    Insert,
    Into,
    Update,
    Set,
    Delete,
    From,
    Select,
    Subscribe,
    Unsubscribe,
    Skip,
    Where,
    Values,
    Star,
    Equal,
    LeftParen,
    RightParen,
    Comma,
    /// A quoted (`'...'`, with `''` as an escaped quote) or bare value.
    /// Bare values run until whitespace, `,`, `(` or `)`.
    Value,
    Key,
    Tag,
    Stream,
    Push,
    Pop,
    Peek,
    Back,
    Front,
    Returning,
    Topic,
    Mysql,
    Connect,
    Disconnect,
}

/// A lexical unit: its kind plus the matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: String) -> Self {
        Self { kind, text }
    }

    pub fn eof() -> Self {
        Self::new(TokenKind::Eof, String::new())
    }
}

/// Sink for tokens emitted by the scanner.
///
/// Production code buffers tokens into a reusable [`TokenBuffer`] so a busy
/// connection does not reallocate per request; tests may consume tokens one
/// at a time.
pub trait TokenConsumer {
    fn consume(&mut self, token: Token);
}

/// Source of tokens for the parser. Produces an EOF token forever once the
/// real tokens are exhausted.
pub trait TokenProducer {
    fn produce(&mut self) -> Token;
}

/// Reusable token buffer: the consumer side collects a scan, the producer
/// side feeds the parser.
#[derive(Debug, Default)]
pub struct TokenBuffer {
    idx: usize,
    tokens: Vec<Token>,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the buffer for the next statement, keeping its allocation.
    pub fn reuse(&mut self) {
        self.idx = 0;
        self.tokens.clear();
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl TokenConsumer for TokenBuffer {
    fn consume(&mut self, token: Token) {
        self.tokens.push(token);
    }
}

impl TokenProducer for TokenBuffer {
    fn produce(&mut self) -> Token {
        match self.tokens.get(self.idx) {
            Some(tok) => {
                self.idx += 1;
                tok.clone()
            }
            None => Token::eof(),
        }
    }
}

/// A state is a function that scans one grammatical element and returns the
/// next state, or `None` when the statement shape is complete.
#[derive(Clone, Copy)]
struct State(fn(&mut Lexer<'_>) -> Option<State>);

/// Scanner state: a cursor over the input plus the token sink.
pub struct Lexer<'a> {
    input: &'a str,
    /// Start of the current lexeme.
    start: usize,
    /// Current byte position.
    pos: usize,
    /// Byte width of the last char read, for one-step backup.
    width: usize,
    tokens: &'a mut dyn TokenConsumer,
    err: Option<String>,
}

/// Scans `input`, feeding tokens to `tokens`. Returns false if the scan
/// ended in an error token.
pub fn scan(input: &str, tokens: &mut dyn TokenConsumer) -> bool {
    let mut lexer = Lexer {
        input,
        start: 0,
        pos: 0,
        width: 0,
        tokens,
        err: None,
    };
    lexer.run();
    lexer.err.is_none()
}

/// True at a token boundary: end of input or whitespace.
fn is_boundary(c: Option<char>) -> bool {
    c.map_or(true, char::is_whitespace)
}

impl<'a> Lexer<'a> {
    fn run(&mut self) {
        let mut state = Some(State(lex_command));
        while let Some(State(f)) = state {
            state = f(self);
        }
        self.emit(TokenKind::Eof);
    }

    // cursor helpers

    fn next(&mut self) -> Option<char> {
        match self.input[self.pos..].chars().next() {
            Some(c) => {
                self.width = c.len_utf8();
                self.pos += self.width;
                Some(c)
            }
            None => {
                self.width = 0;
                None
            }
        }
    }

    /// Steps back one char. Valid once per call to `next`.
    fn backup(&mut self) {
        self.pos -= self.width;
        self.width = 0;
    }

    fn peek(&mut self) -> Option<char> {
        let c = self.next();
        if c.is_some() {
            self.backup();
        }
        c
    }

    fn end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Returns the current lexeme and advances the lexeme start past it.
    fn current(&mut self) -> String {
        let s = self.input[self.start..self.pos].to_string();
        self.start = self.pos;
        s
    }

    /// Skips over the pending input before this point.
    fn ignore(&mut self) {
        self.start = self.pos;
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.next() {
            if !c.is_whitespace() {
                self.backup();
                break;
            }
        }
        self.ignore();
    }

    fn scan_till_boundary(&mut self) {
        while let Some(c) = self.next() {
            if c.is_whitespace() {
                self.backup();
                break;
            }
        }
    }

    // emitting

    fn emit(&mut self, kind: TokenKind) {
        let text = self.current();
        self.tokens.consume(Token::new(kind, text));
    }

    fn emit_text(&mut self, kind: TokenKind, text: String) {
        self.start = self.pos;
        self.tokens.consume(Token::new(kind, text));
    }

    /// Emits an error token and terminates the scan.
    fn error_token(&mut self, msg: String) -> Option<State> {
        self.err = Some(msg.clone());
        self.tokens.consume(Token::new(TokenKind::Error, msg));
        None
    }

    // matching

    /// Matches the rest of `expected` (the first `skip` chars were already
    /// consumed by dispatch) and requires a token boundary after it.
    fn match_keyword(&mut self, expected: &str, skip: usize) -> bool {
        let mut done = true;
        for want in expected.chars().skip(skip) {
            match self.next() {
                Some(c) if c.to_ascii_lowercase() == want => {}
                _ => done = false,
            }
        }
        if !is_boundary(self.peek()) {
            done = false;
            self.scan_till_boundary();
        }
        done
    }

    /// Tries to match `expected` without advancing on failure.
    fn try_match(&mut self, expected: &str) -> bool {
        let saved = (self.pos, self.width);
        for want in expected.chars() {
            match self.next() {
                Some(c) if c.to_ascii_lowercase() == want => {}
                _ => {
                    (self.pos, self.width) = saved;
                    return false;
                }
            }
        }
        true
    }

    fn lex_match(
        &mut self,
        kind: TokenKind,
        expected: &str,
        skip: usize,
        next: Option<State>,
    ) -> Option<State> {
        if self.match_keyword(expected, skip) {
            self.emit(kind);
            return next;
        }
        let cur = self.current();
        self.error_token(format!("unexpected token:{}", cur))
    }

    fn lex_try_match(
        &mut self,
        kind: TokenKind,
        expected: &str,
        on_match: State,
        no_match: State,
    ) -> Option<State> {
        self.skip_whitespace();
        if self.try_match(expected) {
            self.emit(kind);
            return Some(on_match);
        }
        Some(no_match)
    }

    /// Scans a valid identifier: a letter followed by letters or digits.
    fn lex_identifier(&mut self, kind: TokenKind, next: Option<State>) -> Option<State> {
        self.skip_whitespace();
        match self.next() {
            Some(c) if c.is_alphabetic() => {}
            _ => {
                let cur = self.current();
                return self.error_token(format!("identifier must begin with a letter {}", cur));
            }
        }
        while let Some(c) = self.next() {
            if !c.is_alphabetic() && !c.is_numeric() {
                self.backup();
                break;
            }
        }
        self.emit(kind);
        next
    }

    fn lex_left_paren(&mut self, next: State) -> Option<State> {
        self.skip_whitespace();
        if self.next() != Some('(') {
            return self.error_token("expected (".to_string());
        }
        self.emit(TokenKind::LeftParen);
        Some(next)
    }

    /// Scans a value: quoted with `''` as an escaped quote (collapsed
    /// here, so the emitted text is the literal value), or bare up to
    /// whitespace, `,`, `(` or `)`.
    fn lex_value(&mut self, next: Option<State>) -> Option<State> {
        self.skip_whitespace();
        if self.end() {
            return self.error_token("expected value but got eof".to_string());
        }
        if self.next() == Some('\'') {
            self.ignore();
            let mut value = String::new();
            loop {
                match self.next() {
                    None => return self.error_token("string was not delimited".to_string()),
                    Some('\'') => {
                        if self.peek() == Some('\'') {
                            self.next();
                            value.push('\'');
                        } else {
                            self.emit_text(TokenKind::Value, value);
                            return next;
                        }
                    }
                    Some(c) => value.push(c),
                }
            }
        }
        // bare value; the first char was already consumed above
        while let Some(c) = self.next() {
            if c.is_whitespace() || c == ',' || c == '(' || c == ')' {
                self.backup();
                break;
            }
        }
        self.emit(TokenKind::Value);
        next
    }
}

// WHERE clause states

fn lex_where_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Column, Some(State(lex_where_equal)))
}

fn lex_where_equal(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('=') {
        lx.emit(TokenKind::Equal);
        return Some(State(lex_where_value));
    }
    lx.error_token("expected =".to_string())
}

fn lex_where_value(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_value(Some(State(lex_returning)))
}

// INSERT / PUSH states

fn lex_push_into(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('b') => lx.lex_match(TokenKind::Back, "back", 1, Some(State(lex_insert_into))),
        Some('f') => lx.lex_match(TokenKind::Front, "front", 1, Some(State(lex_insert_into))),
        Some('i') => lx.lex_match(TokenKind::Into, "into", 1, Some(State(lex_insert_table))),
        _ => lx.error_token("unexpected token expected front, back or into".to_string()),
    }
}

fn lex_insert_into(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    lx.lex_match(TokenKind::Into, "into", 0, Some(State(lex_insert_table)))
}

fn lex_insert_table(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Table, Some(State(lex_insert_lparen)))
}

fn lex_insert_lparen(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_left_paren(State(lex_insert_column))
}

fn lex_insert_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Column, Some(State(lex_insert_column_comma_or_rparen)))
}

fn lex_insert_column_comma_or_rparen(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    match lx.next() {
        Some(',') => {
            lx.emit(TokenKind::Comma);
            Some(State(lex_insert_column))
        }
        Some(')') => {
            lx.emit(TokenKind::RightParen);
            Some(State(lex_insert_values))
        }
        _ => lx.error_token("expected , or )".to_string()),
    }
}

fn lex_insert_values(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    lx.lex_match(TokenKind::Values, "values", 0, Some(State(lex_insert_values_lparen)))
}

fn lex_insert_values_lparen(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_left_paren(State(lex_insert_value))
}

fn lex_insert_value(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_value(Some(State(lex_insert_value_comma_or_rparen)))
}

fn lex_insert_value_comma_or_rparen(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    match lx.next() {
        Some(',') => {
            lx.emit(TokenKind::Comma);
            Some(State(lex_insert_value))
        }
        Some(')') => {
            lx.emit(TokenKind::RightParen);
            Some(State(lex_returning))
        }
        _ => lx.error_token("expected , or )".to_string()),
    }
}

// RETURNING states

fn lex_returning(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.end() {
        return None;
    }
    lx.lex_match(TokenKind::Returning, "returning", 0, Some(State(lex_returning_star)))
}

fn lex_returning_star(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('*') {
        lx.emit(TokenKind::Star);
        return None;
    }
    lx.backup();
    lex_returning_column(lx)
}

fn lex_returning_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Column, Some(State(lex_returning_comma_or_end)))
}

fn lex_returning_comma_or_end(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.end() {
        return None;
    }
    if lx.next() == Some(',') {
        lx.emit(TokenKind::Comma);
        return Some(State(lex_returning_column));
    }
    lx.error_token("expected ,".to_string())
}

// SELECT states

fn lex_select_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Column, Some(State(lex_select_column_comma_or_from)))
}

fn lex_select_column_comma_or_from(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some(',') {
        lx.emit(TokenKind::Comma);
        return Some(State(lex_select_column));
    }
    lx.backup();
    lex_from(lx)
}

fn lex_select_star(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('*') {
        lx.emit(TokenKind::Star);
        return Some(State(lex_from));
    }
    lx.backup();
    lex_select_column(lx)
}

// POP / PEEK states

fn lex_pop_from(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.try_match("from") {
        lx.emit(TokenKind::From);
        return Some(State(lex_from_table));
    }
    if lx.next() == Some('*') {
        lx.emit(TokenKind::Star);
        return Some(State(lex_from));
    }
    lx.backup();
    if lx.try_match("back") {
        lx.emit(TokenKind::Back);
        return Some(State(lex_select_star));
    }
    if lx.try_match("front") {
        lx.emit(TokenKind::Front);
        return Some(State(lex_select_star));
    }
    lex_select_column(lx)
}

fn lex_peek_from(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('*') {
        lx.emit(TokenKind::Star);
        return Some(State(lex_from));
    }
    lx.backup();
    if lx.try_match("back") {
        lx.emit(TokenKind::Back);
        return Some(State(lex_select_star));
    }
    if lx.try_match("front") {
        lx.emit(TokenKind::Front);
        return Some(State(lex_select_star));
    }
    lex_select_column(lx)
}

// UPDATE states

fn lex_update_table(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Table, Some(State(lex_update_set)))
}

fn lex_update_set(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    lx.lex_match(TokenKind::Set, "set", 0, Some(State(lex_set_column)))
}

fn lex_set_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.end() {
        return None;
    }
    lx.lex_identifier(TokenKind::Column, Some(State(lex_set_column_equal)))
}

fn lex_set_column_equal(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('=') {
        lx.emit(TokenKind::Equal);
        return Some(State(lex_set_column_value));
    }
    lx.error_token("expected =".to_string())
}

fn lex_set_column_value(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_value(Some(State(lex_set_comma_or_where)))
}

fn lex_set_comma_or_where(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some(',') {
        lx.emit(TokenKind::Comma);
        return Some(State(lex_set_column));
    }
    lx.backup();
    Some(State(lex_where))
}

// DELETE / shared FROM states

fn lex_from(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    lx.lex_match(TokenKind::From, "from", 0, Some(State(lex_from_table)))
}

fn lex_from_table(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Table, Some(State(lex_where)))
}

fn lex_where(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_try_match(
        TokenKind::Where,
        "where",
        State(lex_where_column),
        State(lex_returning),
    )
}

// KEY and TAG states

fn lex_key_table(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Table, Some(State(lex_key_column)))
}

fn lex_key_column(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Column, None)
}

// SUBSCRIBE / UNSUBSCRIBE states

fn lex_subscribe(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    if lx.next() == Some('*') {
        lx.backup();
        return lex_select_star(lx);
    }
    lx.backup();
    lx.lex_try_match(
        TokenKind::Skip,
        "skip",
        State(lex_select_star),
        State(lex_topic),
    )
}

fn lex_topic(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_identifier(TokenKind::Topic, None)
}

fn lex_unsubscribe_from(lx: &mut Lexer<'_>) -> Option<State> {
    lex_from(lx)
}

// CONNECT state

fn lex_connect_value(lx: &mut Lexer<'_>) -> Option<State> {
    lx.lex_value(None)
}

// command dispatch

/// subscribe, unsubscribe, connect, disconnect after the mysql keyword.
fn lex_command_mysql(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('s') => lx.lex_match(TokenKind::Subscribe, "subscribe", 1, Some(State(lex_subscribe))),
        Some('u') => lx.lex_match(
            TokenKind::Unsubscribe,
            "unsubscribe",
            1,
            Some(State(lex_unsubscribe_from)),
        ),
        Some('c') => lx.lex_match(TokenKind::Connect, "connect", 1, Some(State(lex_connect_value))),
        Some('d') => lx.lex_match(TokenKind::Disconnect, "disconnect", 1, None),
        _ => {
            let cur = lx.current();
            lx.error_token(format!("invalid command:{}", cur))
        }
    }
}

/// stream, status, stop after "st".
fn lex_command_st(lx: &mut Lexer<'_>) -> Option<State> {
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('r') => lx.lex_match(TokenKind::Stream, "stream", 3, Some(State(lex_command))),
        Some('a') => lx.lex_match(TokenKind::Status, "status", 3, None),
        Some('o') => lx.lex_match(TokenKind::Stop, "stop", 3, None),
        _ => {
            let cur = lx.current();
            lx.error_token(format!("invalid command:{}", cur))
        }
    }
}

/// select, subscribe, status, stop, stream after "s".
fn lex_command_s(lx: &mut Lexer<'_>) -> Option<State> {
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('e') => lx.lex_match(TokenKind::Select, "select", 2, Some(State(lex_select_star))),
        Some('u') => lx.lex_match(TokenKind::Subscribe, "subscribe", 2, Some(State(lex_subscribe))),
        Some('t') => lex_command_st(lx),
        _ => {
            let cur = lx.current();
            lx.error_token(format!("invalid command:{}", cur))
        }
    }
}

/// push, pop, peek after "p".
fn lex_command_p(lx: &mut Lexer<'_>) -> Option<State> {
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('u') => lx.lex_match(TokenKind::Push, "push", 2, Some(State(lex_push_into))),
        Some('o') => lx.lex_match(TokenKind::Pop, "pop", 2, Some(State(lex_pop_from))),
        Some('e') => lx.lex_match(TokenKind::Peek, "peek", 2, Some(State(lex_peek_from))),
        _ => {
            let cur = lx.current();
            lx.error_token(format!("invalid command:{}", cur))
        }
    }
}

/// Initial state.
fn lex_command(lx: &mut Lexer<'_>) -> Option<State> {
    lx.skip_whitespace();
    match lx.next().map(|c| c.to_ascii_lowercase()) {
        Some('u') => {
            // update or unsubscribe
            if lx.next().map(|c| c.to_ascii_lowercase()) == Some('p') {
                lx.lex_match(TokenKind::Update, "update", 2, Some(State(lex_update_table)))
            } else {
                lx.lex_match(
                    TokenKind::Unsubscribe,
                    "unsubscribe",
                    2,
                    Some(State(lex_unsubscribe_from)),
                )
            }
        }
        Some('s') => lex_command_s(lx),
        Some('i') => lx.lex_match(TokenKind::Insert, "insert", 1, Some(State(lex_insert_into))),
        Some('d') => lx.lex_match(TokenKind::Delete, "delete", 1, Some(State(lex_from))),
        Some('k') => lx.lex_match(TokenKind::Key, "key", 1, Some(State(lex_key_table))),
        Some('t') => lx.lex_match(TokenKind::Tag, "tag", 1, Some(State(lex_key_table))),
        Some('c') => lx.lex_match(TokenKind::Close, "close", 1, None),
        Some('p') => lex_command_p(lx),
        Some('m') => lx.lex_match(TokenKind::Mysql, "mysql", 1, Some(State(lex_command_mysql))),
        _ => {
            let cur = lx.current();
            lx.error_token(format!("invalid command:{}", cur))
        }
    }
}
