use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::BytePacketBuffer;

/// The response code of a dns packet, as defined in RFC 1035 section 4.1.1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum ResponseCode {
    #[default]
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl TryFrom<u8> for ResponseCode {
    type Error = ReaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoError),
            1 => Ok(Self::FormatError),
            2 => Ok(Self::ServerFailure),
            3 => Ok(Self::NameError),
            4 => Ok(Self::NotImplemented),
            5 => Ok(Self::Refused),
            other => Err(ReaderError::InvalidResponseCode(other)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Header {
    pub id: u16,

    pub recursion_desired: bool,
    pub truncated_message: bool,
    pub authoritative_answer: bool,
    pub opcode: u8,
    pub response: bool,

    pub response_code: ResponseCode,
    pub checking_disabled: bool,
    pub authed_data: bool,
    pub z: bool,
    pub recursion_available: bool,

    pub questions: u16,
    pub answers: u16,
    pub authoritative_entries: u16,
    pub resource_entries: u16,
}

impl Header {
    /// Builds a header for a simple, recursive query for the given id.
    pub fn question(id: u16) -> Self {
        Self {
            id,
            recursion_desired: true,
            questions: 1,
            ..Default::default()
        }
    }

    /// Builds the header of the response matching this query's header.
    pub fn response(&self) -> Self {
        Self {
            id: self.id,
            recursion_desired: self.recursion_desired,
            response: true,
            recursion_available: true,
            ..Default::default()
        }
    }

    /// Same as [`Header::response`], but for a response already built,
    /// preserving the existing answer counters.
    pub fn response_from(&self) -> Self {
        Self {
            id: self.id,
            recursion_desired: self.recursion_desired,
            response: true,
            recursion_available: true,
            questions: self.questions,
            answers: self.answers,
            authoritative_entries: self.authoritative_entries,
            resource_entries: self.resource_entries,
            ..Default::default()
        }
    }

    pub fn with_response_code(mut self, response_code: ResponseCode) -> Self {
        self.response_code = response_code;
        self
    }

    pub fn read(buffer: &mut BytePacketBuffer) -> Result<Self, ReaderError> {
        let id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;

        let recursion_desired = (a & (1 << 0)) > 0;
        let truncated_message = (a & (1 << 1)) > 0;
        let authoritative_answer = (a & (1 << 2)) > 0;
        let opcode = (a >> 3) & 0x0F;
        let response = (a & (1 << 7)) > 0;

        let response_code = ResponseCode::try_from(b & 0x0F)?;
        let checking_disabled = (b & (1 << 4)) > 0;
        let authed_data = (b & (1 << 5)) > 0;
        let z = (b & (1 << 6)) > 0;
        let recursion_available = (b & (1 << 7)) > 0;

        let questions = buffer.read_u16()?;
        let answers = buffer.read_u16()?;
        let authoritative_entries = buffer.read_u16()?;
        let resource_entries = buffer.read_u16()?;

        Ok(Self {
            id,
            recursion_desired,
            truncated_message,
            authoritative_answer,
            opcode,
            response,
            response_code,
            checking_disabled,
            authed_data,
            z,
            recursion_available,
            questions,
            answers,
            authoritative_entries,
            resource_entries,
        })
    }

    pub fn write(&self, buffer: &mut BytePacketBuffer) -> Result<(), WriterError> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.response_code as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_roundtrip_question_header() {
        let header = Header::question(42);
        let mut buffer = BytePacketBuffer::default();
        header.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let read_back = Header::read(&mut buffer).unwrap();
        assert_eq!(read_back.id, 42);
        assert!(read_back.recursion_desired);
        assert_eq!(read_back.questions, 1);
    }

    #[test]
    fn should_build_response_header_from_question() {
        let question = Header::question(7);
        let response = question.response();
        assert_eq!(response.id, 7);
        assert!(response.response);
        assert!(response.recursion_available);
    }
}
