use stowage_common::{Image, Result};

use super::{ImageAttributesMut, ImageHandle};
use crate::guard::{GuardedLocations, GuardedTags};

impl ImageHandle for Image {
    fn image(&self) -> &Image {
        self
    }

    fn attributes_mut(&mut self) -> ImageAttributesMut<'_> {
        ImageAttributesMut {
            name: &mut self.name,
            status: &mut self.status,
            visibility: &mut self.visibility,
            protected: &mut self.protected,
            size: &mut self.size,
            checksum: &mut self.checksum,
            disk_format: &mut self.disk_format,
            container_format: &mut self.container_format,
            min_disk: &mut self.min_disk,
            min_ram: &mut self.min_ram,
            extra_properties: &mut self.extra_properties,
        }
    }

    fn tags(&mut self) -> GuardedTags<'_> {
        GuardedTags::unguarded(&mut self.tags)
    }

    fn locations(&mut self) -> GuardedLocations<'_> {
        GuardedLocations::unguarded(&mut self.locations)
    }

    fn delete(&mut self) -> Result<()> {
        Image::delete(self)
    }
}
