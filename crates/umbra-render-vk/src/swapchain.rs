// SPDX-License-Identifier: CEPL-1.0
//! Swap chain creation and the surface negotiation rules behind it.
use crate::context::Context;
use crate::resources::{create_image_view, Owned};
use crate::VkResultExt;
use ash::khr::swapchain;
use ash::vk;
use tracing::info;
use umbra_render::{PresentPreference, RenderError, RenderSize};

pub(crate) struct Swapchain {
    // Views go before the images they were made from.
    views: Vec<Owned<vk::ImageView>>,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub(crate) unsafe fn new(
        ctx: &Context,
        size: RenderSize,
        preference: PresentPreference,
    ) -> Result<Self, RenderError> {
        let surf = ctx.surface_loader();
        let phys = ctx.physical_device();
        let caps = surf
            .get_physical_device_surface_capabilities(phys, ctx.surface())
            .calling("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = surf
            .get_physical_device_surface_formats(phys, ctx.surface())
            .calling("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let modes = surf
            .get_physical_device_surface_present_modes(phys, ctx.surface())
            .calling("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            RenderError::CapabilityMissing("surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&modes, preference);
        let extent = choose_extent(&caps, size);
        let min_image_count = choose_image_count(&caps);

        let families = ctx.queues().unique();
        let (sharing_mode, family_count, p_families) = if families.len() > 1 {
            (
                vk::SharingMode::CONCURRENT,
                families.len() as u32,
                families.as_ptr(),
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let loader = ctx.swapchain_loader().clone();
        let handle = loader
            .create_swapchain(&ci, None)
            .creating("swap chain")?;
        let mut out = Self {
            views: Vec::new(),
            images: Vec::new(),
            loader,
            handle,
            format: surface_format.format,
            extent,
        };
        out.images = out
            .loader
            .get_swapchain_images(handle)
            .calling("vkGetSwapchainImagesKHR")?;
        for &image in &out.images {
            out.views.push(create_image_view(
                ctx.device(),
                image,
                vk::ImageViewType::TYPE_2D,
                out.format,
                vk::ImageAspectFlags::COLOR,
                0,
                1,
            )?);
        }

        info!(
            "swap chain {}x{} {} {} {} images",
            extent.width,
            extent.height,
            fmt_name(out.format),
            pm_name(present_mode),
            out.images.len()
        );
        Ok(out)
    }

    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub(crate) fn format(&self) -> vk::Format {
        self.format
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images.len()
    }

    pub(crate) fn views(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.views.iter().map(Owned::handle)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.views.clear();
        unsafe { self.loader.destroy_swapchain(self.handle, None) }
    }
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// 8-bit BGRA sRGB with the sRGB non-linear color space, else whatever the
/// surface lists first.
pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is always available, so it is the fallback either way.
pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentPreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's current extent when it dictates one, otherwise the
/// framebuffer size clamped to the supported range.
pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; a maximum of zero means unbounded.
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[2]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_only_when_offered_and_wanted() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&fifo, PresentPreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_follows_the_surface_when_fixed() {
        let c = caps((1280, 720), 2, 3);
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn extent_is_clamped_when_free() {
        let c = caps((u32::MAX, u32::MAX), 2, 3);
        let e = choose_extent(&c, RenderSize::new(8000, 600));
        assert_eq!((e.width, e.height), (4096, 600));
        let e = choose_extent(&c, RenderSize::new(4, 4));
        assert_eq!((e.width, e.height), (16, 16));
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 8)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 3)), 3);
        // Zero max means no upper bound.
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);
    }
}
