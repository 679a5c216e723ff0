use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    frame::MAX_PAYLOAD,
    command::{Envelope, Command, Verb, ModuleId, HEADER_SIZE},
    registers::{Bank, Schema},
    marshal::{self, Data, RegisterError},
    };
use super::{Error, Link};


/**
    register access to one module of a device, this is a lightweight reference to [Link]

    registers are addressed by index in the module's [Schema], runs are checked locally before anything is sent
*/
pub struct Device<'l, S> {
    link: &'l Link<S>,
    module: ModuleId,
    schema: &'static Schema,
}
impl<'l, S: AsyncRead + AsyncWrite + Unpin + Send> Device<'l, S> {
    pub fn new(link: &'l Link<S>, module: ModuleId, schema: &'static Schema) -> Self {
        Self {link, module, schema}
    }
    pub fn link(&self) -> &'l Link<S> {self.link}
    pub fn module(&self) -> ModuleId {self.module}
    pub fn schema(&self) -> &'static Schema {self.schema}

    /// read the wire data of registers `start .. start+count`
    pub async fn read(&self, start: u8, count: u8) -> Result<Data, Error> {
        let expected = self.size(start, count)?;
        let response = self.exchange(Verb::Read, Verb::MultiRead, start, count, &[]).await?;
        if response.body().len() != expected
            {return Err(Error::Unexpected("read response size mismatch"))}
        Ok(Data::from_slice(response.body())
            .map_err(|_| RegisterError::PayloadOverflow)?)
    }
    /// write the wire data of registers `start .. start+count`
    pub async fn write(&self, start: u8, count: u8, data: &[u8]) -> Result<(), Error> {
        let expected = self.size(start, count)?;
        if data.len() != expected
            {return Err(RegisterError::SizeMismatch {expected, found: data.len()}.into())}
        self.exchange(Verb::Write, Verb::MultiWrite, start, count, data).await?;
        Ok(())
    }
    /// true if the device registers `start .. start+count` hold the given wire data
    pub async fn compare(&self, start: u8, count: u8, data: &[u8]) -> Result<bool, Error> {
        let expected = self.size(start, count)?;
        if data.len() != expected
            {return Err(RegisterError::SizeMismatch {expected, found: data.len()}.into())}
        let response = self.exchange(Verb::Compare, Verb::Compare, start, count, data).await?;
        match response.body() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(Error::Unexpected("malformed compare result")),
        }
    }

    /// read registers `start .. start+count` into a local copy of the module's bank
    pub async fn fetch<const N: usize>(&self, bank: &mut Bank<N>, start: u8, count: u8) -> Result<(), Error> {
        let data = self.read(start, count).await?;
        marshal::write_range(self.schema, &mut bank[..], start.into(), count.into(), &data)?;
        Ok(())
    }
    /// write registers `start .. start+count` from a local copy of the module's bank
    pub async fn store<const N: usize>(&self, bank: &Bank<N>, start: u8, count: u8) -> Result<(), Error> {
        let data = marshal::read_range(self.schema, &bank[..], start.into(), count.into())?;
        self.write(start, count, &data).await
    }

    fn size(&self, start: u8, count: u8) -> Result<usize, Error> {
        let (start, count) = (usize::from(start), usize::from(count));
        let fields = self.schema.range(start, count)
            .ok_or(RegisterError::OutOfRange {start, count})?;
        let size = marshal::wire_size(fields);
        if size > MAX_PAYLOAD - HEADER_SIZE
            {return Err(RegisterError::PayloadOverflow.into())}
        Ok(size)
    }
    async fn exchange(&self, single: Verb, multiple: Verb, start: u8, count: u8, data: &[u8]) -> Result<Envelope, Error> {
        let verb = if count == 1 {single} else {multiple};
        let request = Envelope::with_header(
            self.module,
            Command::request(verb),
            [self.link.tag(), start, count],
            data,
            )?;
        let response = self.link.request(&request).await?;
        if response.header() != request.header()
            {return Err(Error::Unexpected("response sub-header mismatch"))}
        Ok(response)
    }
}
