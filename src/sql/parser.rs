//! Recursive parser for the command language.
//!
//! Consumes tokens from a [`TokenProducer`] with one token of lookahead and
//! builds exactly one [`Request`], or an error Request carrying the first
//! grammar violation. There is no backtracking beyond what the grammar
//! naturally allows, and a failed parse is never partially executed.

use crate::engine::request::{
    ColumnValue, DeleteRequest, Filter, IndexRequest, InsertRequest, PushRequest,
    QueueReadRequest, Request, Returning, SelectRequest, Statement, SubscribeRequest,
    UnsubscribeRequest, UpdateRequest,
};
use crate::sql::lexer::{Token, TokenKind, TokenProducer};

type ParseResult<T> = Result<T, String>;

struct Parser<'a> {
    tokens: &'a mut dyn TokenProducer,
    streaming: bool,
}

/// Parses one statement from the token stream.
///
/// A scan error surfaces here as an error token and becomes an error
/// Request, so callers only ever deal with one failure path.
pub fn parse(tokens: &mut dyn TokenProducer) -> Statement {
    let mut parser = Parser {
        tokens,
        streaming: false,
    };
    let request = match parser.run() {
        Ok(req) => req,
        Err(msg) => Request::Error { msg },
    };
    Statement {
        streaming: parser.streaming,
        request,
    }
}

impl<'a> Parser<'a> {
    fn run(&mut self) -> ParseResult<Request> {
        let tok = self.tokens.produce();
        match tok.kind {
            TokenKind::Stream => {
                self.streaming = true;
                self.run()
            }
            TokenKind::Insert => self.parse_insert(),
            TokenKind::Select => self.parse_select(),
            TokenKind::Update => self.parse_update(),
            TokenKind::Delete => self.parse_delete(),
            TokenKind::Push => self.parse_push(),
            TokenKind::Pop => self.parse_queue_read(false),
            TokenKind::Peek => self.parse_queue_read(true),
            TokenKind::Subscribe => self.parse_subscribe(),
            TokenKind::Unsubscribe => self.parse_unsubscribe(),
            TokenKind::Key => self.parse_index().map(Request::Key),
            TokenKind::Tag => self.parse_index().map(Request::Tag),
            TokenKind::Status => self.parse_bare(Request::Status),
            TokenKind::Stop => self.parse_bare(Request::Stop),
            TokenKind::Close => self.parse_bare(Request::Close),
            TokenKind::Error => Err(tok.text),
            _ => Err("invalid request".to_string()),
        }
    }

    // shared sub-grammars

    fn expect(&mut self, kind: TokenKind, msg: &str) -> ParseResult<Token> {
        let tok = self.tokens.produce();
        if tok.kind != kind {
            return Err(msg.to_string());
        }
        Ok(tok)
    }

    fn parse_table_name(&mut self) -> ParseResult<String> {
        Ok(self.expect(TokenKind::Table, "expected table name")?.text)
    }

    fn parse_column_name(&mut self) -> ParseResult<String> {
        Ok(self.expect(TokenKind::Column, "expected column name")?.text)
    }

    /// `column = value`, with the column token optionally already consumed.
    fn parse_equal_val(&mut self, col: Option<Token>) -> ParseResult<ColumnValue> {
        let col = match col {
            Some(tok) => tok,
            None => self.tokens.produce(),
        };
        if col.kind != TokenKind::Column {
            return Err("expected column name".to_string());
        }
        self.expect(TokenKind::Equal, "expected = sign")?;
        let val = self.expect(TokenKind::Value, "expected valid value")?;
        Ok(ColumnValue {
            col: col.text,
            val: val.text,
        })
    }

    /// `where column = value`; the `where` token was already consumed.
    fn parse_where_body(&mut self) -> ParseResult<Filter> {
        let cv = self.parse_equal_val(None)?;
        Ok(Filter {
            col: cv.col,
            val: cv.val,
        })
    }

    /// Comma-separated column list; the first token is passed in. Returns
    /// the list and the first token that is not part of it.
    fn parse_column_list(&mut self, mut tok: Token) -> ParseResult<(Vec<String>, Token)> {
        let mut cols = Vec::new();
        loop {
            if tok.kind != TokenKind::Column {
                return Err("expected column name".to_string());
            }
            cols.push(tok.text);
            tok = self.tokens.produce();
            if tok.kind != TokenKind::Comma {
                return Ok((cols, tok));
            }
            tok = self.tokens.produce();
        }
    }

    /// Trailing `returning` clause. `pending` is a token the caller already
    /// pulled while looking for it; `None` means produce one here.
    fn parse_returning(&mut self, pending: Option<Token>) -> ParseResult<Returning> {
        let tok = match pending {
            Some(tok) => tok,
            None => self.tokens.produce(),
        };
        match tok.kind {
            TokenKind::Eof => Ok(Returning::RowCount),
            TokenKind::Returning => {
                let tok = self.tokens.produce();
                if tok.kind == TokenKind::Star {
                    return Ok(Returning::All);
                }
                let (cols, _) = self.parse_column_list(tok)?;
                Ok(Returning::Columns(cols))
            }
            _ => Err(format!("invalid token {}: expected returning", tok.text)),
        }
    }

    /// Parenthesized column list then parenthesized value list; the counts
    /// must agree.
    fn parse_col_val_lists(&mut self, table: String) -> ParseResult<InsertRequest> {
        self.expect(TokenKind::LeftParen, "expected (")?;
        let mut cols = Vec::new();
        loop {
            cols.push(self.parse_column_name()?);
            let tok = self.tokens.produce();
            match tok.kind {
                TokenKind::Comma => continue,
                TokenKind::RightParen => break,
                _ => return Err("expected , or )".to_string()),
            }
        }
        self.expect(TokenKind::Values, "expected values keyword")?;
        self.expect(TokenKind::LeftParen, "expected values (")?;
        let mut vals = Vec::new();
        loop {
            vals.push(self.expect(TokenKind::Value, "expected value")?.text);
            let tok = self.tokens.produce();
            match tok.kind {
                TokenKind::Comma => continue,
                TokenKind::RightParen => break,
                _ => return Err("expected , or )".to_string()),
            }
        }
        if cols.len() != vals.len() {
            return Err(format!(
                "number of columns:{} and values:{} do not match",
                cols.len(),
                vals.len()
            ));
        }
        let col_vals = cols
            .into_iter()
            .zip(vals)
            .map(|(col, val)| ColumnValue { col, val })
            .collect();
        Ok(InsertRequest {
            table,
            col_vals,
            returning: Returning::RowCount,
        })
    }

    // statements

    fn parse_bare(&mut self, req: Request) -> ParseResult<Request> {
        self.expect(TokenKind::Eof, "unexpected extra token")?;
        Ok(req)
    }

    fn parse_insert(&mut self) -> ParseResult<Request> {
        self.expect(TokenKind::Into, "expected into")?;
        let table = self.parse_table_name()?;
        let mut req = self.parse_col_val_lists(table)?;
        req.returning = self.parse_returning(None)?;
        Ok(Request::Insert(req))
    }

    fn parse_select(&mut self) -> ParseResult<Request> {
        let mut req = SelectRequest {
            table: String::new(),
            cols: Vec::new(),
            filter: None,
        };
        let mut tok = self.tokens.produce();
        if tok.kind == TokenKind::Star {
            tok = self.tokens.produce();
        } else {
            let (cols, next) = self.parse_column_list(tok)?;
            req.cols = cols;
            tok = next;
        }
        if tok.kind != TokenKind::From {
            return Err("expected from".to_string());
        }
        req.table = self.parse_table_name()?;
        let tok = self.tokens.produce();
        if tok.kind == TokenKind::Eof {
            return Ok(Request::Select(req));
        }
        if tok.kind != TokenKind::Where {
            return Err("expected where clause".to_string());
        }
        req.filter = Some(self.parse_where_body()?);
        Ok(Request::Select(req))
    }

    fn parse_update(&mut self) -> ParseResult<Request> {
        let table = self.parse_table_name()?;
        self.expect(TokenKind::Set, "expected set keyword")?;
        let mut req = UpdateRequest {
            table,
            col_vals: Vec::new(),
            filter: None,
            returning: Returning::RowCount,
        };
        let mut pending = None;
        loop {
            let tok = self.tokens.produce();
            match tok.kind {
                TokenKind::Column => {
                    req.col_vals.push(self.parse_equal_val(Some(tok))?);
                }
                TokenKind::Comma => continue,
                TokenKind::Where => {
                    req.filter = Some(self.parse_where_body()?);
                    break;
                }
                TokenKind::Returning | TokenKind::Eof => {
                    pending = Some(tok);
                    break;
                }
                _ => return Err("expected column or where keyword".to_string()),
            }
        }
        if req.col_vals.is_empty() {
            return Err("expected at least one column value pair".to_string());
        }
        req.returning = self.parse_returning(pending)?;
        Ok(Request::Update(req))
    }

    fn parse_delete(&mut self) -> ParseResult<Request> {
        self.expect(TokenKind::From, "expected from")?;
        let table = self.parse_table_name()?;
        let mut req = DeleteRequest {
            table,
            filter: None,
            returning: Returning::RowCount,
        };
        let tok = self.tokens.produce();
        match tok.kind {
            TokenKind::Eof => return Ok(Request::Delete(req)),
            TokenKind::Where => {
                req.filter = Some(self.parse_where_body()?);
                req.returning = self.parse_returning(None)?;
            }
            _ => {
                req.returning = self.parse_returning(Some(tok))?;
            }
        }
        Ok(Request::Delete(req))
    }

    fn parse_push(&mut self) -> ParseResult<Request> {
        let mut front = false;
        let mut tok = self.tokens.produce();
        match tok.kind {
            TokenKind::Front => {
                front = true;
                tok = self.tokens.produce();
            }
            TokenKind::Back => {
                tok = self.tokens.produce();
            }
            _ => {}
        }
        if tok.kind != TokenKind::Into {
            return Err("expected into".to_string());
        }
        let table = self.parse_table_name()?;
        let mut insert = self.parse_col_val_lists(table)?;
        insert.returning = self.parse_returning(None)?;
        Ok(Request::Push(PushRequest { insert, front }))
    }

    fn parse_queue_read(&mut self, peek: bool) -> ParseResult<Request> {
        let mut req = QueueReadRequest {
            table: String::new(),
            cols: Vec::new(),
            star: false,
            // reads default to the front of the queue
            front: true,
        };
        let mut tok = self.tokens.produce();
        match tok.kind {
            TokenKind::Front => {
                tok = self.tokens.produce();
            }
            TokenKind::Back => {
                req.front = false;
                tok = self.tokens.produce();
            }
            _ => {}
        }
        match tok.kind {
            TokenKind::Star => {
                req.star = true;
                tok = self.tokens.produce();
            }
            TokenKind::From => {}
            _ => {
                let (cols, next) = self.parse_column_list(tok)?;
                req.cols = cols;
                tok = next;
            }
        }
        if tok.kind != TokenKind::From {
            return Err("expected from".to_string());
        }
        req.table = self.parse_table_name()?;
        self.expect(TokenKind::Eof, "expected eof token")?;
        Ok(if peek {
            Request::Peek(req)
        } else {
            Request::Pop(req)
        })
    }

    fn parse_index(&mut self) -> ParseResult<IndexRequest> {
        let table = self.parse_table_name()?;
        let column = self.parse_column_name()?;
        self.expect(TokenKind::Eof, "expected eof token")?;
        Ok(IndexRequest { table, column })
    }

    fn parse_subscribe(&mut self) -> ParseResult<Request> {
        let mut tok = self.tokens.produce();
        if tok.kind == TokenKind::Topic {
            return Ok(Request::SubscribeTopic { topic: tok.text });
        }
        let mut req = SubscribeRequest {
            table: String::new(),
            skip: false,
            filter: None,
        };
        if tok.kind == TokenKind::Skip {
            req.skip = true;
            tok = self.tokens.produce();
        }
        if tok.kind != TokenKind::Star {
            return Err("expected * symbol".to_string());
        }
        self.expect(TokenKind::From, "expected from")?;
        req.table = self.parse_table_name()?;
        let tok = self.tokens.produce();
        if tok.kind == TokenKind::Eof {
            return Ok(Request::Subscribe(req));
        }
        if tok.kind != TokenKind::Where {
            return Err("expected where clause".to_string());
        }
        req.filter = Some(self.parse_where_body()?);
        Ok(Request::Subscribe(req))
    }

    fn parse_unsubscribe(&mut self) -> ParseResult<Request> {
        self.expect(TokenKind::From, "expected from")?;
        let table = self.parse_table_name()?;
        let mut req = UnsubscribeRequest {
            table,
            filter: None,
        };
        let tok = self.tokens.produce();
        if tok.kind == TokenKind::Eof {
            return Ok(Request::Unsubscribe(req));
        }
        if tok.kind != TokenKind::Where {
            return Err("expected where clause".to_string());
        }
        req.filter = Some(self.parse_where_body()?);
        Ok(Request::Unsubscribe(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::{TokenBuffer, scan};

    fn parse_str(input: &str) -> Statement {
        let mut buf = TokenBuffer::new();
        scan(input, &mut buf);
        parse(&mut buf)
    }

    fn expect_error(input: &str) -> String {
        match parse_str(input).request {
            Request::Error { msg } => msg,
            other => panic!("expected error request for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_insert() {
        let stmt = parse_str("insert into stocks (ticker, bid) values (IBM, 123)");
        assert!(!stmt.streaming);
        match stmt.request {
            Request::Insert(req) => {
                assert_eq!(req.table, "stocks");
                assert_eq!(
                    req.col_vals,
                    vec![
                        ColumnValue {
                            col: "ticker".into(),
                            val: "IBM".into()
                        },
                        ColumnValue {
                            col: "bid".into(),
                            val: "123".into()
                        },
                    ]
                );
                assert_eq!(req.returning, Returning::RowCount);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_insert_with_escaped_quote() {
        let stmt = parse_str("insert into t (a) values ('it''s')");
        match stmt.request {
            Request::Insert(req) => {
                assert_eq!(req.col_vals[0].col, "a");
                assert_eq!(req.col_vals[0].val, "it's");
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_insert_returning() {
        match parse_str("insert into t (a) values (1) returning *").request {
            Request::Insert(req) => assert_eq!(req.returning, Returning::All),
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("insert into t (a) values (1) returning a, id").request {
            Request::Insert(req) => {
                assert_eq!(
                    req.returning,
                    Returning::Columns(vec!["a".into(), "id".into()])
                )
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn insert_column_value_counts_must_match() {
        let msg = expect_error("insert into t (a, b) values (1)");
        assert!(msg.contains("do not match"), "{msg}");
    }

    #[test]
    fn parses_select_variants() {
        match parse_str("select * from stocks").request {
            Request::Select(req) => {
                assert_eq!(req.table, "stocks");
                assert!(req.cols.is_empty());
                assert!(req.filter.is_none());
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("select ticker, bid from stocks where sector = TECH").request {
            Request::Select(req) => {
                assert_eq!(req.cols, vec!["ticker".to_string(), "bid".to_string()]);
                assert_eq!(
                    req.filter,
                    Some(Filter {
                        col: "sector".into(),
                        val: "TECH".into()
                    })
                );
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_update() {
        match parse_str("update stocks set bid = 140, ask = 142 where ticker = IBM returning *")
            .request
        {
            Request::Update(req) => {
                assert_eq!(req.col_vals.len(), 2);
                assert_eq!(req.col_vals[1].col, "ask");
                assert_eq!(
                    req.filter,
                    Some(Filter {
                        col: "ticker".into(),
                        val: "IBM".into()
                    })
                );
                assert_eq!(req.returning, Returning::All);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn update_requires_a_column_value_pair() {
        let msg = expect_error("update stocks set");
        assert!(msg.contains("at least one"), "{msg}");
    }

    #[test]
    fn parses_delete_variants() {
        match parse_str("delete from stocks").request {
            Request::Delete(req) => {
                assert!(req.filter.is_none());
                assert_eq!(req.returning, Returning::RowCount);
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("delete from stocks where id = 2 returning ticker").request {
            Request::Delete(req) => {
                assert_eq!(
                    req.filter,
                    Some(Filter {
                        col: "id".into(),
                        val: "2".into()
                    })
                );
                assert_eq!(req.returning, Returning::Columns(vec!["ticker".into()]));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_key_and_tag() {
        match parse_str("key stocks ticker").request {
            Request::Key(req) => {
                assert_eq!(req.table, "stocks");
                assert_eq!(req.column, "ticker");
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("tag stocks sector").request {
            Request::Tag(req) => assert_eq!(req.column, "sector"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_subscribe_variants() {
        match parse_str("subscribe * from stocks where ticker = IBM").request {
            Request::Subscribe(req) => {
                assert!(!req.skip);
                assert_eq!(
                    req.filter,
                    Some(Filter {
                        col: "ticker".into(),
                        val: "IBM".into()
                    })
                );
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("subscribe skip * from stocks").request {
            Request::Subscribe(req) => assert!(req.skip),
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("subscribe quotes").request {
            Request::SubscribeTopic { topic } => assert_eq!(topic, "quotes"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_unsubscribe() {
        match parse_str("unsubscribe from stocks").request {
            Request::Unsubscribe(req) => assert!(req.filter.is_none()),
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("unsubscribe from stocks where pubsubid = 12").request {
            Request::Unsubscribe(req) => {
                assert_eq!(
                    req.filter,
                    Some(Filter {
                        col: "pubsubid".into(),
                        val: "12".into()
                    })
                );
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_push_pop_peek() {
        match parse_str("push front into q (a) values (1)").request {
            Request::Push(req) => {
                assert!(req.front);
                assert_eq!(req.insert.table, "q");
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("pop * from q").request {
            Request::Pop(req) => {
                assert!(req.star);
                assert!(req.front);
            }
            other => panic!("unexpected request {other:?}"),
        }
        match parse_str("peek back a, b from q").request {
            Request::Peek(req) => {
                assert!(!req.front);
                assert_eq!(req.cols, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_str("status").request, Request::Status);
        assert_eq!(parse_str("stop").request, Request::Stop);
        assert_eq!(parse_str("close").request, Request::Close);
    }

    #[test]
    fn stream_prefix_sets_the_flag() {
        let stmt = parse_str("stream select * from t");
        assert!(stmt.streaming);
        assert!(matches!(stmt.request, Request::Select(_)));
        let stmt = parse_str("stream status");
        assert!(stmt.streaming);
        assert_eq!(stmt.request, Request::Status);
    }

    #[test]
    fn scan_errors_become_error_requests() {
        let msg = expect_error("selectx * from t");
        assert!(msg.contains("unexpected token"), "{msg}");
        expect_error("insert into t (a) values ('unterminated");
    }

    #[test]
    fn grammar_violations_become_error_requests() {
        expect_error("insert t (a) values (1)"); // missing into
        expect_error("unsubscribe stocks"); // missing from
        expect_error("subscribe skip ticker from stocks"); // columns not allowed
        expect_error("mysql connect 'dsn'"); // no request variant
    }
}
