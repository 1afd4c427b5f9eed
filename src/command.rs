use bytes::Bytes;

static CRLF: &[u8; 2] = b"\r\n";

/// A command to send to the server: an ordered list of arguments, each an
/// arbitrary byte string. Serialized as an array of bulk strings, so arguments
/// are binary safe by construction; no bound is enforced on the outgoing side.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Command {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    // *<argc>\r\n followed by $<len>\r\n<raw-bytes>\r\n per argument.
    pub fn serialize(&self) -> Vec<u8> {
        let argc_str = self.args.len().to_string();
        let payload_len: usize = self.args.iter().map(|arg| arg.len()).sum();
        let mut bytes =
            Vec::with_capacity(1 + argc_str.len() + CRLF.len() + self.args.len() * 8 + payload_len);

        bytes.push(b'*');
        bytes.extend_from_slice(argc_str.as_bytes());
        bytes.extend_from_slice(CRLF);

        for arg in &self.args {
            bytes.push(b'$');
            bytes.extend_from_slice(arg.len().to_string().as_bytes());
            bytes.extend_from_slice(CRLF);
            bytes.extend_from_slice(arg);
            bytes.extend_from_slice(CRLF);
        }

        bytes
    }
}

impl From<Command> for Vec<u8> {
    fn from(command: Command) -> Self {
        command.serialize()
    }
}
