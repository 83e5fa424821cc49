use super::{BencodeError, Dict, MalformedKind, Value, MAX_DEPTH};

/// Decodes exactly one value, the whole input has to be consumed.
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let (value, rest) = decode_prefix(input)?;
    if !rest.is_empty() {
        return Err(BencodeError {
            offset: input.len() - rest.len(),
            kind: MalformedKind::TrailingData,
        });
    }
    Ok(value)
}

/// Decodes the first value of the input and returns it with the bytes that follow it.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, &[u8]), BencodeError> {
    let mut decoder = Decoder { input, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, &input[decoder.pos..]))
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn error(&self, offset: usize, kind: MalformedKind) -> BencodeError {
        BencodeError { offset, kind }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        match self.peek() {
            None => Err(self.error(self.pos, MalformedKind::UnexpectedEof)),
            Some(b'i') => self.integer().map(Value::Integer),
            Some(b'0'..=b'9') => self.byte_string().map(Value::Bytes),
            Some(b'l') => self.list(depth + 1).map(Value::List),
            Some(b'd') => self.dict(depth + 1).map(Value::Dict),
            Some(other) => Err(self.error(self.pos, MalformedKind::UnsupportedByte(other))),
        }
    }

    // i<digits>e
    fn integer(&mut self) -> Result<i64, BencodeError> {
        let start = self.pos;
        let digits_start = start + 1;
        let Some(len) = self.input[digits_start..].iter().position(|&b| b == b'e') else {
            return Err(self.error(start, MalformedKind::MissingDelimiter('e')));
        };
        let digits = &self.input[digits_start..digits_start + len];
        let n = parse_integer(digits).ok_or(self.error(start, MalformedKind::InvalidInteger))?;
        self.pos = digits_start + len + 1;
        Ok(n)
    }

    // <len>:<bytes>
    fn byte_string(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.pos;
        let digits_len = self.input[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let colon = start + digits_len;
        match self.input.get(colon) {
            Some(b':') => {}
            None => return Err(self.error(start, MalformedKind::MissingDelimiter(':'))),
            Some(_) => return Err(self.error(start, MalformedKind::InvalidLength)),
        }
        let len: usize = std::str::from_utf8(&self.input[start..colon])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or(self.error(start, MalformedKind::InvalidLength))?;

        let data_start = colon + 1;
        let remaining = self.input.len() - data_start;
        if len > remaining {
            return Err(self.error(start, MalformedKind::LengthOverflow(len)));
        }
        self.pos = data_start + len;
        Ok(self.input[data_start..self.pos].to_vec())
    }

    // l<values>e
    fn list(&mut self, depth: usize) -> Result<Vec<Value>, BencodeError> {
        let start = self.pos;
        if depth > MAX_DEPTH {
            return Err(self.error(start, MalformedKind::TooDeep(MAX_DEPTH)));
        }
        self.pos += 1;
        let mut list = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, MalformedKind::UnterminatedList)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(list);
                }
                Some(_) => list.push(self.value(depth)?),
            }
        }
    }

    // d<key><value>...e
    fn dict(&mut self, depth: usize) -> Result<Dict, BencodeError> {
        let start = self.pos;
        if depth > MAX_DEPTH {
            return Err(self.error(start, MalformedKind::TooDeep(MAX_DEPTH)));
        }
        self.pos += 1;
        let mut dict = Dict::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, MalformedKind::UnterminatedDict)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(dict);
                }
                Some(b'0'..=b'9') => {
                    let key_offset = self.pos;
                    let key = self.byte_string()?;
                    if dict.contains_key(&key) {
                        return Err(self.error(key_offset, MalformedKind::DuplicateKey));
                    }
                    if self.peek().is_none() {
                        return Err(self.error(start, MalformedKind::UnterminatedDict));
                    }
                    let value = self.value(depth)?;
                    dict.push_unchecked(key, value);
                }
                Some(_) => return Err(self.error(self.pos, MalformedKind::NonStringKey)),
            }
        }
    }
}

/// `-0`, leading zeros and empty digits are not valid bencode integers
fn parse_integer(digits: &[u8]) -> Option<i64> {
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if unsigned.len() > 1 && unsigned[0] == b'0' {
        return None;
    }
    if digits[0] == b'-' && unsigned == b"0" {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
